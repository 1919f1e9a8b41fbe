//! SQLite 数据库工具：统一创建连接池
//!
//! 表结构由各 DAO 的 `init_db_with_connection` 负责创建，
//! 连接池在 client 初始化时创建一次，所有 DAO 共享。

use anyhow::Result;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};

/// 创建 SQLite 连接池
pub async fn create_sqlite_pool(db_url: &str) -> Result<Pool<Sqlite>> {
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await?;
    Ok(pool)
}

/// 创建内存 SQLite 连接池（单连接，否则每个连接各自一份内存库）
pub async fn create_memory_pool() -> Result<Pool<Sqlite>> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    Ok(pool)
}
