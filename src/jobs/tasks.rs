/// Background task implementations
use crate::{context::AppContext, error::AppResult};
use chrono::Utc;

/// Drop typing marks older than the TTL
pub async fn sweep_typing(ctx: &AppContext) -> AppResult<u64> {
    Ok(ctx.presence.sweep() as u64)
}

/// Remove realtime subscribers whose connection went away
pub async fn prune_realtime(ctx: &AppContext) -> AppResult<u64> {
    Ok(ctx.gateway.prune_closed() as u64)
}

/// End calls nobody answered within the ring window
pub async fn expire_unanswered_calls(ctx: &AppContext) -> AppResult<u64> {
    ctx.calls.expire_unanswered(Utc::now()).await
}

/// Health check - verify all systems are operational
pub async fn health_check(ctx: &AppContext) -> AppResult<()> {
    sqlx::query("SELECT 1").fetch_one(&ctx.db).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::db::create_memory_pool;

    #[tokio::test]
    async fn test_tasks_run_on_empty_state() {
        let ctx = AppContext::from_pool(create_memory_pool().await.unwrap(), ServerConfig::for_tests());

        assert_eq!(sweep_typing(&ctx).await.unwrap(), 0);
        assert_eq!(prune_realtime(&ctx).await.unwrap(), 0);
        assert_eq!(expire_unanswered_calls(&ctx).await.unwrap(), 0);
        assert!(health_check(&ctx).await.is_ok());
    }

    #[tokio::test]
    async fn test_prune_realtime_removes_dropped_connections() {
        let ctx = AppContext::from_pool(create_memory_pool().await.unwrap(), ServerConfig::for_tests());
        let sub = ctx.gateway.subscribe(1);
        drop(sub);

        assert_eq!(prune_realtime(&ctx).await.unwrap(), 1);
    }
}
