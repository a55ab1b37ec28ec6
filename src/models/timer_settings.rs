use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::now_ms;

/// Per-user timer preference set. Stored as key/value pairs so new settings keys
/// need no schema change; on the wire the pairs are flattened into one object
/// next to the set-wide `updated_at` stamp, e.g.
/// `{"pomodoro_time": 1500, "short_break_time": 300, "updated_at": 1700000000000}`.
///
/// Sync treats the set atomically: clients always send the complete object and a
/// replace swaps every pair under one stamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerSettings {
    pub updated_at: i64,
    #[serde(flatten)]
    pub values: BTreeMap<String, Value>,
}

impl TimerSettings {
    pub fn new() -> Self {
        Self {
            updated_at: now_ms(),
            values: BTreeMap::new(),
        }
    }

    /// Sets one entry and advances the set-wide stamp. `updated_at` itself is
    /// reserved and silently refused as a key.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        if key == "updated_at" {
            return;
        }
        self.values.insert(key, value);
        self.updated_at = now_ms();
    }

    /// Removes one entry, advancing the stamp only when something was there.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let removed = self.values.remove(key);
        if removed.is_some() {
            self.updated_at = now_ms();
        }
        removed
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self::new()
    }
}
