//! SQLite 连接池工具
//!
//! 偏好库只有一张键值表，建表由 DAO 的 `init_db` 负责，不使用迁移目录。

use anyhow::{Context, Result};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};

/// 内存库 URL；每个连接都是独立的库，因此连接池只能有一个连接
pub const MEMORY_DB_URL: &str = "sqlite::memory:";

fn is_memory_url(db_url: &str) -> bool {
    db_url.contains(":memory:")
}

/// 连接池参数；内存库的唯一连接不能被回收，否则表和数据随之丢失
fn pool_options(db_url: &str) -> SqlitePoolOptions {
    if is_memory_url(db_url) {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(5)
    }
}

/// 创建 SQLite 连接池
pub async fn create_sqlite_pool(db_url: &str) -> Result<Pool<Sqlite>> {
    let pool = pool_options(db_url)
        .connect(db_url)
        .await
        .with_context(|| format!("连接SQLite数据库失败: {}", db_url))?;
    Ok(pool)
}

/// 由数据目录拼出偏好库 URL（文件不存在时自动创建）
pub fn prefs_db_url(data_dir: &std::path::Path) -> String {
    format!(
        "sqlite://{}?mode=rwc",
        data_dir.join("bridge_prefs.db").display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_pool_keeps_its_connection() {
        let pool = create_sqlite_pool(MEMORY_DB_URL).await.unwrap();
        let options = pool.options();
        assert_eq!(options.get_max_connections(), 1);
        assert_eq!(options.get_min_connections(), 1);
        assert_eq!(options.get_idle_timeout(), None);
        assert_eq!(options.get_max_lifetime(), None);
    }

    #[test]
    fn file_pool_uses_defaults() {
        let options = pool_options("sqlite:///tmp/x.db?mode=rwc");
        assert_eq!(options.get_max_connections(), 5);
        assert!(options.get_idle_timeout().is_some());
    }
}
