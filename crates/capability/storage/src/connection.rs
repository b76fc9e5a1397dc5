//! 数据库连接管理
//!
//! - connect_pool：建立 Postgres 连接池（最大连接数 8）
//! - run_migrations：执行内置建表脚本（幂等）

use crate::error::StorageError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

const FLEET_CORE_SCHEMA: &str = include_str!("../../../../migrations/0001_fleet_core.sql");

/// 建立 Postgres 连接池
pub async fn connect_pool(database_url: &str) -> Result<PgPool, StorageError> {
    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// 执行建表脚本。脚本全部使用 `if not exists`，可重复执行。
pub async fn run_migrations(pool: &PgPool) -> Result<(), StorageError> {
    sqlx::raw_sql(FLEET_CORE_SCHEMA).execute(pool).await?;
    Ok(())
}
