use serde::{Deserialize, Serialize};

/// A device bound to a user account. `last_sync_timestamp` is the server's view
/// of the device's checkpoint, updated on every sync it performs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub uuid: String,
    pub user_uuid: String,
    pub name: String,
    pub platform: String,
    pub last_sync_timestamp: i64,
    pub created_at: i64,
    pub last_seen_at: i64,
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}) [{}]", self.name, self.platform, self.uuid)
    }
}
