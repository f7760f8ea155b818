/// Gatehouse - gated content platform
///
/// Approval-gated access to a post feed: identities request access, admins
/// approve or deny, approved users see locked posts and can like them.
pub mod access;
pub mod activity;
pub mod analytics;
pub mod api;
pub mod auth;
pub mod config;
pub mod content;
pub mod context;
pub mod db;
pub mod error;
pub mod notify;
pub mod rate_limit;
pub mod server;

pub use context::AppContext;
pub use error::{GateError, GateResult};
