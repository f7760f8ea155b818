/// Application context and dependency injection
use crate::{
    access::{AccessController, AdminSet},
    activity::ActivityLog,
    analytics::AnalyticsService,
    config::ServerConfig,
    content::ContentGate,
    db,
    error::GateResult,
    notify::{self, Notifier},
    rate_limit::{RateLimitConfig, RateLimiter},
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub access: Arc<AccessController>,
    pub activity: Arc<ActivityLog>,
    pub content: Arc<ContentGate>,
    pub analytics: Arc<AnalyticsService>,
    // Rate limiter
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> GateResult<Self> {
        // Validate configuration
        config.validate()?;

        // Create data directories if they don't exist
        Self::ensure_directories(&config).await?;

        // Initialize database
        let pool = db::create_pool(&config.storage.database, db::DatabaseOptions::default()).await?;

        // Run migrations
        db::run_migrations(&pool).await?;

        // Test connection
        db::test_connection(&pool).await?;

        let notifier: Arc<dyn Notifier> = Arc::from(notify::from_config(&config.notifications)?);

        tracing::info!(
            "Application context initialized ({} admins, webhook {})",
            config.authentication.admin_ids.len(),
            if config.notifications.webhook_url.is_some() { "enabled" } else { "disabled" }
        );

        Ok(Self::with_notifier(config, pool, notifier))
    }

    /// Build a context on an already migrated pool
    pub fn from_pool(config: ServerConfig, pool: SqlitePool) -> GateResult<Self> {
        let notifier: Arc<dyn Notifier> = Arc::from(notify::from_config(&config.notifications)?);
        Ok(Self::with_notifier(config, pool, notifier))
    }

    /// Wire every service around a pool and notifier
    pub fn with_notifier(config: ServerConfig, pool: SqlitePool, notifier: Arc<dyn Notifier>) -> Self {
        let admins = AdminSet::new(config.authentication.admin_ids.iter().cloned());
        let activity = ActivityLog::new(pool.clone());

        let access = Arc::new(AccessController::new(pool.clone(), admins, notifier));
        let content = Arc::new(ContentGate::new(pool.clone()));
        let analytics = Arc::new(AnalyticsService::new(pool.clone(), activity.clone()));
        let rate_limiter = Arc::new(RateLimiter::new(RateLimitConfig::default()));

        Self {
            config: Arc::new(config),
            access,
            activity: Arc::new(activity),
            content,
            analytics,
            rate_limiter,
        }
    }

    /// Ensure required directories exist
    async fn ensure_directories(config: &ServerConfig) -> GateResult<()> {
        tokio::fs::create_dir_all(&config.storage.data_directory).await?;
        Ok(())
    }
}
