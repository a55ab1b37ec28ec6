use serde::{Deserialize, Serialize};

/// A sync account. Users are created implicitly when an unknown device
/// initializes, so `name` starts empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub uuid: String,
    pub name: String,
    pub created_at: i64,
    pub last_active_at: i64,
}
