//! Typed change notifications between the store, the sync engine, and watchers.
//!
//! A single broadcast channel carries [`ChangeEvent`]s: the local store
//! publishes after each committed mutation, the sync client publishes run
//! outcomes, and anyone interested (summary cache, auto-sync, UI) subscribes.
//! Lagging subscribers miss events rather than block publishers.

use chrono::NaiveDate;
use tokio::sync::broadcast;

/// Buffer of retained events per subscriber.
const CHANNEL_CAPACITY: usize = 16;

/// Something observable happened to local data or to a sync run.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    /// Timed events changed on these days, by a local edit or a server pull.
    EventsChanged { days: Vec<NaiveDate> },
    /// A system event was recorded locally.
    SystemEventRecorded,
    /// The timer settings set was replaced.
    SettingsChanged,
    /// A sync run finished; counts are rows pushed to and pulled from the server.
    SyncCompleted { pushed: usize, pulled: usize },
    /// A sync run gave up after retries.
    SyncFailed { message: String },
}

/// Broadcast hub for [`ChangeEvent`]s. Cheap to clone; all clones feed the
/// same subscribers.
#[derive(Debug, Clone)]
pub struct ChangeHub {
    sender: broadcast::Sender<ChangeEvent>,
}

impl ChangeHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Subscribes to events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }

    /// Publishes to every current subscriber. Send errors mean nobody is
    /// listening and are ignored.
    pub fn publish(&self, event: ChangeEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChangeHub {
    fn default() -> Self {
        Self::new()
    }
}
