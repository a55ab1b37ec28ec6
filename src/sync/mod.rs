//! Client-side sync: durable local store, server API client, and the engine
//! that runs full and incremental sync cycles between them.
//!
//! Every mutation lands in the [`LocalStore`] first and is queued as pending;
//! the [`SyncClient`] pushes pending work and pulls what other devices wrote,
//! so the app keeps working offline and converges when a server is reachable.
//! Cross-component notifications go through the typed [`ChangeHub`].

pub mod api;
pub mod auto_sync;
pub mod client;
pub mod error;
pub mod hub;
pub mod store;
pub mod summary;

pub use api::ApiClient;
pub use auto_sync::{try_auto_sync, AutoSync};
pub use client::{SyncClient, SyncOutcome};
pub use error::SyncError;
pub use hub::{ChangeEvent, ChangeHub};
pub use store::{LocalStore, StoredCredentials};
pub use summary::{DaySummary, SummaryCache};
