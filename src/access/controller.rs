/// Access controller backed by the entitlement store
use crate::{
    access::{AccessState, AdminSet, RequestOutcome, RequestStats, UserSummary},
    activity::{self, ActivityAction},
    db::{models::timestamp, AccessRequest, Identity, RequestStatus, User, UserStatus},
    error::{is_unique_violation, GateError, GateResult},
    notify::Notifier,
};
use chrono::{Duration, Utc};
use serde_json::json;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Maximum access requests one identity may create per window
pub const REQUEST_LIMIT: i64 = 3;
/// Length of the rolling request window
pub const REQUEST_WINDOW_HOURS: i64 = 24;

/// Access controller
#[derive(Clone)]
pub struct AccessController {
    db: SqlitePool,
    admins: AdminSet,
    notifier: Arc<dyn Notifier>,
}

impl AccessController {
    pub fn new(db: SqlitePool, admins: AdminSet, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            db,
            admins,
            notifier,
        }
    }

    /// Whether an external id belongs to the configured administrator set
    pub fn is_admin(&self, external_id: &str) -> bool {
        self.admins.contains(external_id)
    }

    /// Resolve the access state of an identity
    pub async fn evaluate(&self, external_id: Option<&str>) -> GateResult<AccessState> {
        let Some(external_id) = external_id else {
            return Ok(AccessState::NotAuthenticated);
        };

        if let Some(user) = self.find_user(external_id).await? {
            return Ok(match user.status {
                UserStatus::Active => AccessState::Active(user),
                UserStatus::Banned => AccessState::Banned,
            });
        }

        if self.pending_request(external_id).await?.is_some() {
            Ok(AccessState::Pending)
        } else {
            Ok(AccessState::NoRequest)
        }
    }

    /// Ask for access on behalf of an identity.
    ///
    /// Members, identities with a pending request, and identities over the
    /// rolling request limit get a no-op outcome rather than an error.
    ///
    /// The membership and limit checks are part of the insert itself, so they
    /// are evaluated under the write lock and cannot go stale against a
    /// concurrent approval or denial.
    pub async fn request_access(&self, identity: &Identity) -> GateResult<RequestOutcome> {
        let external_id = identity.external_id.as_str();
        let now = Utc::now();
        let window_start = now - Duration::hours(REQUEST_WINDOW_HOURS);

        let request = AccessRequest {
            id: Uuid::new_v4().to_string(),
            identity: identity.clone(),
            status: RequestStatus::Pending,
            created_at: now,
            approved_at: None,
            approved_by: None,
            denied_at: None,
        };

        let mut tx = self.db.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO access_request
            (id, external_id, username, discriminator, email, avatar, status, created_at)
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7
            WHERE NOT EXISTS (SELECT 1 FROM app_user WHERE external_id = ?2)
              AND (SELECT COUNT(*) FROM access_request
                   WHERE external_id = ?2 AND created_at >= ?8) < ?9
            "#,
        )
        .bind(&request.id)
        .bind(external_id)
        .bind(&identity.username)
        .bind(&identity.discriminator)
        .bind(&identity.email)
        .bind(&identity.avatar)
        .bind(timestamp(now))
        .bind(timestamp(window_start))
        .bind(REQUEST_LIMIT)
        .execute(&mut *tx)
        .await;

        let rows = match inserted {
            Ok(result) => result.rows_affected(),
            // Another pending request already holds the slot
            Err(e) if is_unique_violation(&e) => {
                tx.rollback().await?;
                return Ok(RequestOutcome::AlreadyPending);
            }
            Err(e) => return Err(e.into()),
        };

        if rows == 0 {
            tx.rollback().await?;
            return self.refused_outcome(external_id).await;
        }

        activity::append(
            &mut *tx,
            Some(external_id),
            ActivityAction::RequestAccess,
            &json!({ "username": identity.username }),
        )
        .await?;

        tx.commit().await?;

        info!("Access requested by {} ({})", identity.username, external_id);

        if let Err(e) = self.notifier.access_requested(&request).await {
            warn!("Access request notification failed: {}", e);
        }

        Ok(RequestOutcome::Created(request))
    }

    /// Why a conditional request insert matched nothing
    async fn refused_outcome(&self, external_id: &str) -> GateResult<RequestOutcome> {
        if self.find_user(external_id).await?.is_some() {
            return Ok(RequestOutcome::AlreadyMember);
        }

        if self.pending_request(external_id).await?.is_some() {
            return Ok(RequestOutcome::AlreadyPending);
        }

        debug!("Access request rate limit reached for {}", external_id);
        Ok(RequestOutcome::RateLimited)
    }

    /// Approve a pending request, creating an active user for its identity
    pub async fn approve(&self, request_id: &str, approver_id: &str) -> GateResult<User> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        // Guarded transition: only a pending request can be approved
        let row = sqlx::query(&format!(
            r#"
            UPDATE access_request
            SET status = 'approved', approved_at = ?, approved_by = ?
            WHERE id = ? AND status = 'pending'
            RETURNING {}
            "#,
            AccessRequest::COLUMNS
        ))
        .bind(timestamp(now))
        .bind(approver_id)
        .bind(request_id)
        .fetch_optional(&mut *tx)
        .await?;

        let request = match row {
            Some(row) => AccessRequest::from_row(&row)?,
            None => {
                return Err(GateError::NotFound(format!(
                    "Access request {} not found or no longer pending",
                    request_id
                )))
            }
        };

        let user = User {
            id: Uuid::new_v4().to_string(),
            identity: request.identity.clone(),
            status: UserStatus::Active,
            approved_by: Some(approver_id.to_string()),
            approved_at: Some(now),
            last_login: None,
            created_at: now,
        };

        let inserted = sqlx::query(
            r#"
            INSERT INTO app_user
            (id, external_id, username, discriminator, email, avatar, status,
             approved_by, approved_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, 'active', ?, ?, ?)
            "#,
        )
        .bind(&user.id)
        .bind(&user.identity.external_id)
        .bind(&user.identity.username)
        .bind(&user.identity.discriminator)
        .bind(&user.identity.email)
        .bind(&user.identity.avatar)
        .bind(approver_id)
        .bind(timestamp(now))
        .bind(timestamp(now))
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(GateError::Conflict(format!(
                    "A user already exists for {}",
                    user.identity.external_id
                )))
            }
            Err(e) => return Err(e.into()),
        }

        activity::append(
            &mut *tx,
            Some(approver_id),
            ActivityAction::ApprovedUser,
            &json!({
                "approvedUser": user.identity.username,
                "approvedExternalId": user.identity.external_id,
            }),
        )
        .await?;

        tx.commit().await?;

        info!(
            "Access request {} approved by {} for {}",
            request_id, approver_id, user.identity.external_id
        );

        Ok(user)
    }

    /// Deny a pending request
    pub async fn deny(&self, request_id: &str, admin_id: &str) -> GateResult<AccessRequest> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE access_request
            SET status = 'denied', denied_at = ?
            WHERE id = ? AND status = 'pending'
            RETURNING {}
            "#,
            AccessRequest::COLUMNS
        ))
        .bind(timestamp(now))
        .bind(request_id)
        .fetch_optional(&mut *tx)
        .await?;

        let request = match row {
            Some(row) => AccessRequest::from_row(&row)?,
            None => {
                return Err(GateError::NotFound(format!(
                    "Access request {} not found or no longer pending",
                    request_id
                )))
            }
        };

        activity::append(
            &mut *tx,
            Some(admin_id),
            ActivityAction::DeniedUser,
            &json!({
                "deniedUser": request.identity.username,
                "deniedExternalId": request.identity.external_id,
            }),
        )
        .await?;

        tx.commit().await?;

        info!("Access request {} denied by {}", request_id, admin_id);

        Ok(request)
    }

    /// Ban a user. Administrators cannot be banned.
    pub async fn ban(&self, user_id: &str, admin_id: &str) -> GateResult<User> {
        let user = self
            .get_user(user_id)
            .await?
            .ok_or_else(|| GateError::NotFound(format!("User {} not found", user_id)))?;

        if self.is_admin(&user.identity.external_id) {
            warn!("{} attempted to ban admin {}", admin_id, user.identity.external_id);
            return Err(GateError::Authorization("Cannot ban admin users".to_string()));
        }

        let user = self
            .set_status(
                user,
                UserStatus::Banned,
                admin_id,
                ActivityAction::BannedUser,
            )
            .await?;

        info!("User {} banned by {}", user.identity.external_id, admin_id);
        Ok(user)
    }

    /// Lift a ban
    pub async fn unban(&self, user_id: &str, admin_id: &str) -> GateResult<User> {
        let user = self
            .get_user(user_id)
            .await?
            .ok_or_else(|| GateError::NotFound(format!("User {} not found", user_id)))?;

        let user = self
            .set_status(
                user,
                UserStatus::Active,
                admin_id,
                ActivityAction::UnbannedUser,
            )
            .await?;

        info!("User {} unbanned by {}", user.identity.external_id, admin_id);
        Ok(user)
    }

    async fn set_status(
        &self,
        mut user: User,
        status: UserStatus,
        admin_id: &str,
        action: ActivityAction,
    ) -> GateResult<User> {
        let mut tx = self.db.begin().await?;

        let result = sqlx::query("UPDATE app_user SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(&user.id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(GateError::NotFound(format!("User {} not found", user.id)));
        }

        let details = match action {
            ActivityAction::BannedUser => json!({
                "bannedUser": user.identity.username,
                "bannedExternalId": user.identity.external_id,
            }),
            _ => json!({
                "unbannedUser": user.identity.username,
                "unbannedExternalId": user.identity.external_id,
            }),
        };
        activity::append(&mut *tx, Some(admin_id), action, &details).await?;

        tx.commit().await?;

        user.status = status;
        Ok(user)
    }

    /// Sign-in bookkeeping run after the identity provider verified a login.
    ///
    /// Known users get their profile and last login refreshed; unknown
    /// identities are entered into the request queue. Failures are logged
    /// and swallowed so a bookkeeping error never blocks a login.
    pub async fn sign_in(&self, identity: &Identity) {
        if let Err(e) = self.record_sign_in(identity).await {
            warn!("Sign-in bookkeeping failed for {}: {}", identity.external_id, e);
        }
    }

    async fn record_sign_in(&self, identity: &Identity) -> GateResult<()> {
        let mut tx = self.db.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE app_user
            SET username = ?, discriminator = ?, email = ?, avatar = ?, last_login = ?
            WHERE external_id = ?
            "#,
        )
        .bind(&identity.username)
        .bind(&identity.discriminator)
        .bind(&identity.email)
        .bind(&identity.avatar)
        .bind(timestamp(Utc::now()))
        .bind(&identity.external_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            let outcome = self.request_access(identity).await?;
            debug!("Sign-in for unknown identity {}: {:?}", identity.external_id, outcome);
            return Ok(());
        }

        activity::append(
            &mut *tx,
            Some(&identity.external_id),
            ActivityAction::Login,
            &json!({ "username": identity.username }),
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Get a user by id
    pub async fn get_user(&self, user_id: &str) -> GateResult<Option<User>> {
        let row = sqlx::query(&format!("SELECT {} FROM app_user WHERE id = ?", User::COLUMNS))
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?;

        row.as_ref().map(User::from_row).transpose()
    }

    /// Get a user by external identity
    pub async fn find_user(&self, external_id: &str) -> GateResult<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM app_user WHERE external_id = ?",
            User::COLUMNS
        ))
        .bind(external_id)
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(User::from_row).transpose()
    }

    /// Get an access request by id
    pub async fn get_request(&self, request_id: &str) -> GateResult<Option<AccessRequest>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM access_request WHERE id = ?",
            AccessRequest::COLUMNS
        ))
        .bind(request_id)
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(AccessRequest::from_row).transpose()
    }

    /// The identity's pending request, if any
    pub async fn pending_request(&self, external_id: &str) -> GateResult<Option<AccessRequest>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM access_request WHERE external_id = ? AND status = 'pending'",
            AccessRequest::COLUMNS
        ))
        .bind(external_id)
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(AccessRequest::from_row).transpose()
    }

    /// List access requests newest first with per-status counts
    pub async fn list_requests(
        &self,
        status: Option<RequestStatus>,
    ) -> GateResult<(Vec<AccessRequest>, RequestStats)> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM access_request
            WHERE (?1 IS NULL OR status = ?1)
            ORDER BY created_at DESC, rowid DESC
            "#,
            AccessRequest::COLUMNS
        ))
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.db)
        .await?;

        let requests = rows
            .iter()
            .map(AccessRequest::from_row)
            .collect::<GateResult<Vec<_>>>()?;

        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   COALESCE(SUM(status = 'pending'), 0) AS pending,
                   COALESCE(SUM(status = 'approved'), 0) AS approved,
                   COALESCE(SUM(status = 'denied'), 0) AS denied
            FROM access_request
            "#,
        )
        .fetch_one(&self.db)
        .await?;

        let stats = RequestStats {
            total: row.try_get("total")?,
            pending: row.try_get("pending")?,
            approved: row.try_get("approved")?,
            denied: row.try_get("denied")?,
        };

        Ok((requests, stats))
    }

    /// List users newest first, optionally filtered by status and a
    /// case-insensitive search over username and email.
    ///
    /// SQLite's `LIKE` only folds ASCII, so the search runs on Unicode
    /// lowercased values after the status filter.
    pub async fn list_users(
        &self,
        status: Option<UserStatus>,
        search: Option<&str>,
    ) -> GateResult<Vec<UserSummary>> {
        let needle = search
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM app_user
            WHERE (?1 IS NULL OR status = ?1)
            ORDER BY created_at DESC, rowid DESC
            "#,
            User::COLUMNS
        ))
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.db)
        .await?;

        let mut users = Vec::with_capacity(rows.len());
        for row in &rows {
            let user = User::from_row(row)?;
            if let Some(needle) = &needle {
                if !matches_search(&user, needle) {
                    continue;
                }
            }
            let is_admin = self.is_admin(&user.identity.external_id);
            users.push(UserSummary { user, is_admin });
        }

        Ok(users)
    }
}

/// Case-insensitive substring match on username or email
fn matches_search(user: &User, needle: &str) -> bool {
    user.identity.username.to_lowercase().contains(needle)
        || user.identity.email.to_lowercase().contains(needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, notify::DisabledNotifier};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records every notified request id
    #[derive(Default)]
    struct RecordingNotifier {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn access_requested(&self, request: &AccessRequest) -> GateResult<()> {
            self.seen.lock().unwrap().push(request.id.clone());
            Ok(())
        }
    }

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn access_requested(&self, _request: &AccessRequest) -> GateResult<()> {
            Err(GateError::Internal("webhook down".to_string()))
        }
    }

    fn identity(external_id: &str) -> Identity {
        Identity {
            external_id: external_id.to_string(),
            username: format!("user-{}", external_id),
            discriminator: "0".to_string(),
            email: format!("{}@example.com", external_id),
            avatar: None,
        }
    }

    async fn setup_with(notifier: Arc<dyn Notifier>) -> AccessController {
        let pool = db::connect_in_memory().await.unwrap();
        AccessController::new(pool, AdminSet::new(["admin-1"]), notifier)
    }

    async fn setup() -> AccessController {
        setup_with(Arc::new(DisabledNotifier)).await
    }

    async fn count(controller: &AccessController, sql: &str) -> i64 {
        sqlx::query_scalar(sql).fetch_one(&controller.db).await.unwrap()
    }

    async fn pending_id(controller: &AccessController, external_id: &str) -> String {
        controller
            .pending_request(external_id)
            .await
            .unwrap()
            .expect("pending request")
            .id
    }

    #[tokio::test]
    async fn test_evaluate_walks_through_states() {
        let controller = setup().await;

        assert!(matches!(
            controller.evaluate(None).await.unwrap(),
            AccessState::NotAuthenticated
        ));
        assert!(matches!(
            controller.evaluate(Some("u1")).await.unwrap(),
            AccessState::NoRequest
        ));

        controller.request_access(&identity("u1")).await.unwrap();
        assert!(matches!(
            controller.evaluate(Some("u1")).await.unwrap(),
            AccessState::Pending
        ));

        let request_id = pending_id(&controller, "u1").await;
        let user = controller.approve(&request_id, "admin-1").await.unwrap();
        match controller.evaluate(Some("u1")).await.unwrap() {
            AccessState::Active(active) => assert_eq!(active.id, user.id),
            other => panic!("expected active, got {:?}", other),
        }

        controller.ban(&user.id, "admin-1").await.unwrap();
        assert!(matches!(
            controller.evaluate(Some("u1")).await.unwrap(),
            AccessState::Banned
        ));
    }

    #[tokio::test]
    async fn test_repeated_requests_keep_one_pending() {
        let controller = setup().await;
        let who = identity("u1");

        assert!(controller.request_access(&who).await.unwrap().is_created());
        assert!(matches!(
            controller.request_access(&who).await.unwrap(),
            RequestOutcome::AlreadyPending
        ));
        assert!(matches!(
            controller.request_access(&who).await.unwrap(),
            RequestOutcome::AlreadyPending
        ));

        assert_eq!(count(&controller, "SELECT COUNT(*) FROM access_request").await, 1);
        assert_eq!(
            count(
                &controller,
                "SELECT COUNT(*) FROM activity_log WHERE action = 'request_access'"
            )
            .await,
            1
        );
    }

    #[tokio::test]
    async fn test_fourth_request_in_window_is_rate_limited() {
        let controller = setup().await;
        let who = identity("u1");

        for _ in 0..3 {
            assert!(controller.request_access(&who).await.unwrap().is_created());
            let id = pending_id(&controller, "u1").await;
            controller.deny(&id, "admin-1").await.unwrap();
        }

        assert!(matches!(
            controller.request_access(&who).await.unwrap(),
            RequestOutcome::RateLimited
        ));
        assert_eq!(count(&controller, "SELECT COUNT(*) FROM access_request").await, 3);
        assert!(matches!(
            controller.evaluate(Some("u1")).await.unwrap(),
            AccessState::NoRequest
        ));
    }

    #[tokio::test]
    async fn test_requests_outside_window_do_not_count() {
        let controller = setup().await;
        let old = timestamp(Utc::now() - Duration::hours(REQUEST_WINDOW_HOURS + 1));

        for i in 0..3 {
            sqlx::query(
                r#"
                INSERT INTO access_request
                (id, external_id, username, discriminator, email, status, created_at)
                VALUES (?, 'u1', 'old', '0', 'old@example.com', 'denied', ?)
                "#,
            )
            .bind(format!("old-{}", i))
            .bind(&old)
            .execute(&controller.db)
            .await
            .unwrap();
        }

        assert!(controller
            .request_access(&identity("u1"))
            .await
            .unwrap()
            .is_created());
    }

    #[tokio::test]
    async fn test_member_request_is_noop() {
        let controller = setup().await;
        let who = identity("u1");

        controller.request_access(&who).await.unwrap();
        let id = pending_id(&controller, "u1").await;
        controller.approve(&id, "admin-1").await.unwrap();

        assert!(matches!(
            controller.request_access(&who).await.unwrap(),
            RequestOutcome::AlreadyMember
        ));
        assert_eq!(count(&controller, "SELECT COUNT(*) FROM access_request").await, 1);
    }

    #[tokio::test]
    async fn test_double_approve_creates_one_user() {
        let controller = setup().await;
        controller.request_access(&identity("u1")).await.unwrap();
        let id = pending_id(&controller, "u1").await;

        let user = controller.approve(&id, "admin-1").await.unwrap();
        assert_eq!(user.status, UserStatus::Active);
        assert_eq!(user.approved_by.as_deref(), Some("admin-1"));

        let second = controller.approve(&id, "admin-1").await;
        assert!(matches!(second, Err(GateError::NotFound(_))));

        assert_eq!(count(&controller, "SELECT COUNT(*) FROM app_user").await, 1);
        let request = controller.get_request(&id).await.unwrap().unwrap();
        assert_eq!(request.status, RequestStatus::Approved);
        assert_eq!(request.approved_by.as_deref(), Some("admin-1"));
        assert!(request.approved_at.is_some());
    }

    #[tokio::test]
    async fn test_approve_unknown_request() {
        let controller = setup().await;
        assert!(matches!(
            controller.approve("missing", "admin-1").await,
            Err(GateError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_approve_conflict_rolls_back() {
        let controller = setup().await;
        let now = timestamp(Utc::now());

        sqlx::query(
            r#"
            INSERT INTO app_user (id, external_id, username, discriminator, email, status, created_at)
            VALUES ('user-x', 'u1', 'u1', '0', 'u1@example.com', 'active', ?)
            "#,
        )
        .bind(&now)
        .execute(&controller.db)
        .await
        .unwrap();
        sqlx::query(
            r#"
            INSERT INTO access_request (id, external_id, username, discriminator, email, status, created_at)
            VALUES ('req-x', 'u1', 'u1', '0', 'u1@example.com', 'pending', ?)
            "#,
        )
        .bind(&now)
        .execute(&controller.db)
        .await
        .unwrap();

        assert!(matches!(
            controller.approve("req-x", "admin-1").await,
            Err(GateError::Conflict(_))
        ));

        let request = controller.get_request("req-x").await.unwrap().unwrap();
        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(count(&controller, "SELECT COUNT(*) FROM app_user").await, 1);
        assert_eq!(
            count(
                &controller,
                "SELECT COUNT(*) FROM activity_log WHERE action = 'approved_user'"
            )
            .await,
            0
        );
    }

    #[tokio::test]
    async fn test_deny_allows_future_request() {
        let controller = setup().await;
        let who = identity("u1");

        controller.request_access(&who).await.unwrap();
        let id = pending_id(&controller, "u1").await;

        let denied = controller.deny(&id, "admin-1").await.unwrap();
        assert_eq!(denied.status, RequestStatus::Denied);
        assert!(denied.denied_at.is_some());
        assert_eq!(count(&controller, "SELECT COUNT(*) FROM app_user").await, 0);

        assert!(matches!(
            controller.deny(&id, "admin-1").await,
            Err(GateError::NotFound(_))
        ));
        assert!(matches!(
            controller.approve(&id, "admin-1").await,
            Err(GateError::NotFound(_))
        ));

        assert!(controller.request_access(&who).await.unwrap().is_created());
    }

    #[tokio::test]
    async fn test_ban_admin_is_forbidden() {
        let controller = setup().await;
        let admin = identity("admin-1");

        controller.request_access(&admin).await.unwrap();
        let id = pending_id(&controller, "admin-1").await;
        let user = controller.approve(&id, "admin-1").await.unwrap();

        assert!(matches!(
            controller.ban(&user.id, "admin-1").await,
            Err(GateError::Authorization(_))
        ));

        let stored = controller.get_user(&user.id).await.unwrap().unwrap();
        assert_eq!(stored.status, UserStatus::Active);
    }

    #[tokio::test]
    async fn test_ban_and_unban_cycle() {
        let controller = setup().await;
        controller.request_access(&identity("u1")).await.unwrap();
        let id = pending_id(&controller, "u1").await;
        let user = controller.approve(&id, "admin-1").await.unwrap();

        let banned = controller.ban(&user.id, "admin-1").await.unwrap();
        assert_eq!(banned.status, UserStatus::Banned);

        let restored = controller.unban(&user.id, "admin-1").await.unwrap();
        assert_eq!(restored.status, UserStatus::Active);
        assert!(controller.evaluate(Some("u1")).await.unwrap().is_active());

        assert_eq!(
            count(
                &controller,
                "SELECT COUNT(*) FROM activity_log WHERE action IN ('banned_user', 'unbanned_user')"
            )
            .await,
            2
        );
    }

    #[tokio::test]
    async fn test_ban_unknown_user() {
        let controller = setup().await;
        assert!(matches!(
            controller.ban("nobody", "admin-1").await,
            Err(GateError::NotFound(_))
        ));
        assert!(matches!(
            controller.unban("nobody", "admin-1").await,
            Err(GateError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_sign_in_queues_unknown_identity() {
        let controller = setup().await;
        let who = identity("u1");

        for _ in 0..3 {
            controller.sign_in(&who).await;
        }

        assert!(matches!(
            controller.evaluate(Some("u1")).await.unwrap(),
            AccessState::Pending
        ));
        assert_eq!(count(&controller, "SELECT COUNT(*) FROM access_request").await, 1);
    }

    #[tokio::test]
    async fn test_sign_in_refreshes_known_user() {
        let controller = setup().await;
        let mut who = identity("u1");

        controller.request_access(&who).await.unwrap();
        let id = pending_id(&controller, "u1").await;
        controller.approve(&id, "admin-1").await.unwrap();

        who.username = "renamed".to_string();
        controller.sign_in(&who).await;

        let user = controller.find_user("u1").await.unwrap().unwrap();
        assert_eq!(user.identity.username, "renamed");
        assert!(user.last_login.is_some());
        assert_eq!(
            count(&controller, "SELECT COUNT(*) FROM activity_log WHERE action = 'login'").await,
            1
        );
    }

    #[tokio::test]
    async fn test_sign_in_swallows_store_errors() {
        let controller = setup().await;
        controller.db.close().await;

        // Must not panic or propagate
        controller.sign_in(&identity("u1")).await;
    }

    #[tokio::test]
    async fn test_notifier_called_only_on_creation() {
        let notifier = Arc::new(RecordingNotifier::default());
        let controller = setup_with(notifier.clone()).await;
        let who = identity("u1");

        controller.request_access(&who).await.unwrap();
        controller.request_access(&who).await.unwrap();

        assert_eq!(notifier.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_notifier_failure_does_not_fail_request() {
        let controller = setup_with(Arc::new(FailingNotifier)).await;

        let outcome = controller.request_access(&identity("u1")).await.unwrap();
        assert!(outcome.is_created());
        assert!(matches!(
            controller.evaluate(Some("u1")).await.unwrap(),
            AccessState::Pending
        ));
    }

    #[tokio::test]
    async fn test_list_requests_with_stats() {
        let controller = setup().await;
        for who in ["u1", "u2", "u3"] {
            controller.request_access(&identity(who)).await.unwrap();
        }
        let id = pending_id(&controller, "u1").await;
        controller.approve(&id, "admin-1").await.unwrap();
        let id = pending_id(&controller, "u2").await;
        controller.deny(&id, "admin-1").await.unwrap();

        let (all, stats) = controller.list_requests(None).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(
            stats,
            RequestStats {
                total: 3,
                pending: 1,
                approved: 1,
                denied: 1,
            }
        );
        // Newest first
        assert_eq!(all[0].identity.external_id, "u3");

        let (pending, _) = controller
            .list_requests(Some(RequestStatus::Pending))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].identity.external_id, "u3");
    }

    #[tokio::test]
    async fn test_list_users_search_and_admin_flag() {
        let controller = setup().await;
        for who in ["admin-1", "u1", "u2"] {
            controller.request_access(&identity(who)).await.unwrap();
            let id = pending_id(&controller, who).await;
            controller.approve(&id, "admin-1").await.unwrap();
        }
        let u2 = controller.find_user("u2").await.unwrap().unwrap();
        controller.ban(&u2.id, "admin-1").await.unwrap();

        let all = controller.list_users(None, None).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all
            .iter()
            .find(|s| s.user.identity.external_id == "admin-1")
            .unwrap()
            .is_admin);

        let banned = controller
            .list_users(Some(UserStatus::Banned), None)
            .await
            .unwrap();
        assert_eq!(banned.len(), 1);
        assert_eq!(banned[0].user.identity.external_id, "u2");

        let found = controller.list_users(None, Some("USER-U1")).await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(!found[0].is_admin);

        let wildcard = controller.list_users(None, Some("%")).await.unwrap();
        assert!(wildcard.is_empty());
    }

    #[tokio::test]
    async fn test_list_users_search_folds_non_ascii_case() {
        let controller = setup().await;
        let mut elodie = identity("u1");
        elodie.username = "Élodie".to_string();
        elodie.email = "ÉLODIE@example.com".to_string();

        controller.request_access(&elodie).await.unwrap();
        let id = pending_id(&controller, "u1").await;
        controller.approve(&id, "admin-1").await.unwrap();

        for search in ["élodie", "ÉLOD", "élodie@EXAMPLE"] {
            let found = controller.list_users(None, Some(search)).await.unwrap();
            assert_eq!(found.len(), 1, "search {}", search);
        }
        assert!(controller
            .list_users(None, Some("zoé"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_request_counts_denied_requests_in_window() {
        let controller = setup().await;

        for _ in 0..REQUEST_LIMIT {
            assert!(controller
                .request_access(&identity("u1"))
                .await
                .unwrap()
                .is_created());
            let id = pending_id(&controller, "u1").await;
            controller.deny(&id, "admin-1").await.unwrap();
        }

        assert!(matches!(
            controller.request_access(&identity("u1")).await.unwrap(),
            RequestOutcome::RateLimited
        ));
        assert!(matches!(
            controller.evaluate(Some("u1")).await.unwrap(),
            AccessState::NoRequest
        ));
    }

    /// Controller on a multi-connection WAL database so transactions
    /// really interleave
    async fn setup_on_disk() -> (tempfile::TempDir, AccessController) {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::create_pool(
            &dir.path().join("gatehouse.sqlite"),
            db::DatabaseOptions::default(),
        )
        .await
        .unwrap();
        db::run_migrations(&pool).await.unwrap();

        let controller =
            AccessController::new(pool, AdminSet::new(["admin-1"]), Arc::new(DisabledNotifier));
        (dir, controller)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_approvals_create_one_user() {
        let (_dir, controller) = setup_on_disk().await;
        controller.request_access(&identity("u1")).await.unwrap();
        let id = pending_id(&controller, "u1").await;

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let controller = controller.clone();
                let id = id.clone();
                tokio::spawn(async move { controller.approve(&id, &format!("admin-{}", i)).await })
            })
            .collect();

        let mut approved = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => approved += 1,
                Err(e) => assert!(matches!(e, GateError::NotFound(_)), "{}", e),
            }
        }

        assert_eq!(approved, 1);
        assert_eq!(count(&controller, "SELECT COUNT(*) FROM app_user").await, 1);
        assert_eq!(
            count(
                &controller,
                "SELECT COUNT(*) FROM activity_log WHERE action = 'approved_user'"
            )
            .await,
            1
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_requests_racing_approval_never_leave_member_pending() {
        let (_dir, controller) = setup_on_disk().await;
        let identities = 40;

        for n in 0..identities {
            let who = format!("u{}", n);
            controller.request_access(&identity(&who)).await.unwrap();
            let id = pending_id(&controller, &who).await;

            let mut handles = Vec::new();
            for _ in 0..4 {
                let controller = controller.clone();
                let who = who.clone();
                handles.push(tokio::spawn(async move {
                    controller.request_access(&identity(&who)).await.map(|_| ())
                }));
            }
            {
                let controller = controller.clone();
                handles.push(tokio::spawn(async move {
                    controller.approve(&id, "admin-1").await.map(|_| ())
                }));
            }
            for _ in 0..4 {
                let controller = controller.clone();
                let who = who.clone();
                handles.push(tokio::spawn(async move {
                    controller.request_access(&identity(&who)).await.map(|_| ())
                }));
            }

            for handle in handles {
                handle.await.unwrap().unwrap();
            }
        }

        assert_eq!(
            count(&controller, "SELECT COUNT(*) FROM app_user").await,
            identities
        );
        let stray = count(
            &controller,
            r#"
            SELECT COUNT(*) FROM access_request r
            WHERE r.status = 'pending'
              AND EXISTS (SELECT 1 FROM app_user u WHERE u.external_id = r.external_id)
            "#,
        )
        .await;
        assert_eq!(stray, 0);
    }
}
