use thiserror::Error;
use tracing::info;

use crate::{
    config::DatabaseConfig,
    migrations::MIGRATOR,
    repository::{create_pg_pool, PgStorage},
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// 连接数据库并执行迁移
pub async fn connect_storage(config: &DatabaseConfig) -> Result<PgStorage, InfrastructureError> {
    let pool = create_pg_pool(&config.url, config.max_connections).await?;
    MIGRATOR.run(&pool).await?;
    info!(max_connections = config.max_connections, "数据库连接池已就绪，迁移已完成");
    Ok(PgStorage::new(pool))
}
