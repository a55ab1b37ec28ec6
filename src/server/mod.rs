//! Server side of the sync system: identity/session management, the merge
//! coordinator, the entity store, and the HTTP surface that exposes them.

pub mod db;
pub mod error;
pub mod events;
pub mod http;
pub mod identity;
pub mod merge;

pub use error::{AuthError, MergeError};
pub use http::{router, AppState};
pub use identity::{IdentityManager, SessionContext};
pub use merge::MergeCoordinator;
