mod device;
mod system_event;
mod timed_event;
mod timer_settings;
mod user;

pub use device::Device;
pub use system_event::{SystemEvent, SystemEventKind};
pub use timed_event::{EventKind, TimedEvent};
pub use timer_settings::TimerSettings;
pub use user::User;

use chrono::Utc;

/// Current time as integer milliseconds since the Unix epoch, the unit every
/// sync timestamp in the system uses.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
