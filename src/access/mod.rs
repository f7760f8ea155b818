/// Access control
///
/// Decides whether an identity may reach the feed, must wait for approval,
/// or is banned, and mediates the approve/deny/ban/unban transitions.
///
/// Per identity the lifecycle is:
///
/// ```text
/// NO_REQUEST -> PENDING -> APPROVED (user active) <-> BANNED
///                       -> DENIED  (eligible to request again)
/// ```

pub mod controller;

pub use controller::{AccessController, REQUEST_LIMIT, REQUEST_WINDOW_HOURS};

use crate::db::User;
use serde::{Deserialize, Serialize};

/// Access state of an identity
#[derive(Debug, Clone)]
pub enum AccessState {
    /// No verified identity on the request
    NotAuthenticated,
    /// Identity known, never requested (or last request was denied)
    NoRequest,
    /// Waiting for an admin decision
    Pending,
    /// Approved but banned
    Banned,
    /// Approved and allowed onto the feed
    Active(User),
}

impl AccessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessState::NotAuthenticated => "not_authenticated",
            AccessState::NoRequest => "no_request",
            AccessState::Pending => "pending",
            AccessState::Banned => "banned",
            AccessState::Active(_) => "active",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, AccessState::Active(_))
    }
}

/// Result of asking for access.
///
/// Everything but `Created` is a silent no-op from the caller's side.
#[derive(Debug, Clone)]
pub enum RequestOutcome {
    Created(crate::db::AccessRequest),
    AlreadyMember,
    AlreadyPending,
    RateLimited,
}

impl RequestOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, RequestOutcome::Created(_))
    }
}

/// Static set of administrator external ids.
///
/// Built once from configuration and injected; admin status is never
/// persisted on users.
#[derive(Debug, Clone, Default)]
pub struct AdminSet {
    ids: Vec<String>,
}

impl AdminSet {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, external_id: &str) -> bool {
        self.ids.iter().any(|id| id == external_id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Access request counts by status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestStats {
    pub total: i64,
    pub pending: i64,
    pub approved: i64,
    pub denied: i64,
}

/// User listing entry with the admin flag computed from configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    #[serde(flatten)]
    pub user: User,
    pub is_admin: bool,
}
