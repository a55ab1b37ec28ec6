//! Per-day aggregates over the local event store, cached behind an `RwLock`.
//!
//! Summaries are recomputed from the store on a cache miss. Writers never
//! update a cached value in place: the store publishes a [`ChangeEvent`] after
//! each commit, and the invalidator task evicts the affected days, so the next
//! read recomputes from post-commit rows. Readers either see the previous
//! summary or wait for the recompute, never a torn one.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use super::error::SyncError;
use super::hub::ChangeEvent;
use super::store::LocalStore;
use crate::models::{EventKind, TimedEvent};

/// Aggregates for one calendar day (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DaySummary {
    /// Live events that day
    pub events: usize,
    /// Pomodoro runs that ran to completion
    pub completed_pomodoros: usize,
    /// Total length of completed pomodoro runs
    pub focus_ms: i64,
    /// Total length of completed rest runs
    pub rest_ms: i64,
}

impl DaySummary {
    pub fn from_events(events: &[TimedEvent]) -> Self {
        let mut summary = DaySummary {
            events: events.len(),
            ..DaySummary::default()
        };
        for event in events.iter().filter(|e| e.completed) {
            match event.kind {
                EventKind::Pomodoro => {
                    summary.completed_pomodoros += 1;
                    summary.focus_ms += event.duration_ms();
                }
                EventKind::Rest => summary.rest_ms += event.duration_ms(),
                EventKind::CountUp | EventKind::Custom => summary.focus_ms += event.duration_ms(),
            }
        }
        summary
    }
}

/// Day-keyed summary cache over a [`LocalStore`].
#[derive(Debug, Clone)]
pub struct SummaryCache {
    store: LocalStore,
    cache: Arc<RwLock<HashMap<NaiveDate, DaySummary>>>,
}

impl SummaryCache {
    pub fn new(store: LocalStore) -> Self {
        Self {
            store,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Returns the summary for `day`, recomputing it from the store on a miss.
    ///
    /// The write lock is held across the recompute. An eviction racing with an
    /// in-flight recompute waits for it and then removes the freshly inserted
    /// entry, so a summary computed from pre-commit rows never outlives the
    /// commit's invalidation.
    pub async fn summary_for(&self, day: NaiveDate) -> Result<DaySummary, SyncError> {
        if let Some(summary) = self.cache.read().await.get(&day) {
            return Ok(*summary);
        }

        let mut cache = self.cache.write().await;
        if let Some(summary) = cache.get(&day) {
            return Ok(*summary);
        }
        let events = self.store.events_for_day(day).await?;
        let summary = DaySummary::from_events(&events);
        cache.insert(day, summary);
        Ok(summary)
    }

    /// Drops the cached summary for one day.
    pub async fn invalidate(&self, day: NaiveDate) {
        self.cache.write().await.remove(&day);
    }

    /// Drops every cached summary.
    pub async fn invalidate_all(&self) {
        self.cache.write().await.clear();
    }

    /// Spawns the invalidator: a task that subscribes to the store's change
    /// hub and evicts the days each event touched. An `EventsChanged` with no
    /// days means the whole history changed and flushes the cache, as does a
    /// lagged subscription (missed events could have touched any day). The
    /// task ends when every hub sender is gone; abort the handle to stop it
    /// earlier.
    pub fn spawn_invalidator(&self) -> JoinHandle<()> {
        let cache = self.clone();
        let mut receiver = self.store.hub().subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(ChangeEvent::EventsChanged { days }) if days.is_empty() => {
                        cache.invalidate_all().await;
                    }
                    Ok(ChangeEvent::EventsChanged { days }) => {
                        for day in days {
                            cache.invalidate(day).await;
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "summary invalidator lagged, flushing cache");
                        cache.invalidate_all().await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
