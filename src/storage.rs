use sqlx::postgres::PgListener;
use sqlx::PgPool;

use crate::config::PoolConfig;
use crate::error::QueueError;

/// The channel jobs are published on when they become eligible for leasing
/// (fresh inserts and retried-after-failure re-inserts).
pub const NEW_JOB_CHANNEL: &str = "new_job";

/// Bundles the pooled transactional connection with a dedicated long-lived
/// listener connection. `PgListener` owns a single physical connection because
/// `LISTEN`/`NOTIFY` channel subscriptions are connection-scoped in Postgres,
/// so it cannot be drawn from the same pool transactions use.
#[derive(Clone)]
pub struct StorageAdapter {
    pub pool: PgPool,
}

impl StorageAdapter {
    pub async fn connect(config: &PoolConfig) -> Result<Self, QueueError> {
        let pool = config.connect().await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a new dedicated listener connection and subscribes it to `channel`.
    /// Callers should keep this alive for the lifetime of the subscription;
    /// a fresh one should be opened per worker, not shared across workers.
    pub async fn listen(&self, channel: &str) -> Result<PgListener, QueueError> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(channel).await?;
        Ok(listener)
    }

    pub async fn notify(&self, channel: &str, payload: &str) -> Result<(), QueueError> {
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(channel)
            .bind(payload)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
