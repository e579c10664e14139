/// Application context and dependency injection
use crate::{
    account::AccountDirectory,
    calls::CallSignaling,
    chat::MessageStore,
    config::ServerConfig,
    db,
    discovery::DiscoveryRanker,
    error::{AppError, AppResult},
    matching::{MatchFormation, SwipeLedger},
    presence::PresenceTracker,
    profile::ProfileDirectory,
    rate_limit::RateLimiter,
    realtime::RealtimeGateway,
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub accounts: AccountDirectory,
    pub profiles: ProfileDirectory,
    pub ledger: SwipeLedger,
    pub formation: MatchFormation,
    pub discovery: DiscoveryRanker,
    pub messages: MessageStore,
    pub calls: CallSignaling,
    // Ephemeral state
    pub presence: Arc<PresenceTracker>,
    pub gateway: Arc<RealtimeGateway>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> AppResult<Self> {
        config.validate()?;

        Self::ensure_directories(&config).await?;

        let pool = db::create_pool(&config.storage.database, db::DatabaseOptions::default()).await?;
        db::run_migrations(&pool).await?;
        db::test_connection(&pool).await?;

        Ok(Self::from_pool(pool, config))
    }

    /// Wire services over an existing, migrated pool
    pub fn from_pool(pool: SqlitePool, config: ServerConfig) -> Self {
        let accounts = AccountDirectory::new(pool.clone());
        let profiles = ProfileDirectory::new(pool.clone());
        let formation = MatchFormation::new(pool.clone(), accounts.clone(), profiles.clone());
        let ledger = SwipeLedger::new(pool.clone(), accounts.clone(), formation.clone());
        let discovery = DiscoveryRanker::new(
            accounts.clone(),
            profiles.clone(),
            ledger.clone(),
            formation.clone(),
        );

        let presence = Arc::new(PresenceTracker::new(&config.presence));
        let gateway = Arc::new(RealtimeGateway::new(config.realtime.connection_buffer));

        let messages = MessageStore::new(
            pool.clone(),
            accounts.clone(),
            profiles.clone(),
            formation.clone(),
            presence.clone(),
        );
        let calls = CallSignaling::new(pool.clone(), accounts.clone(), formation.clone(), &config.calls);

        let rate_limiter = Arc::new(RateLimiter::new(&config.rate_limit));

        Self {
            config: Arc::new(config),
            db: pool,
            accounts,
            profiles,
            ledger,
            formation,
            discovery,
            messages,
            calls,
            presence,
            gateway,
            rate_limiter,
        }
    }

    /// Ensure required directories exist
    async fn ensure_directories(config: &ServerConfig) -> AppResult<()> {
        let dir = &config.storage.data_directory;
        if !dir.exists() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                AppError::Internal(format!("Failed to create directory {:?}: {}", dir, e))
            })?;
        }

        Ok(())
    }

    /// Get service URL
    pub fn service_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.config.service.hostname, self.config.service.port
        )
    }
}
