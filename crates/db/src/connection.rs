use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;

use expenso_core::config::DatabaseConfig;

pub type DbPool = sqlx::SqlitePool;

pub async fn connect(database_url: &str) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(database_url, 5, 30).await
}

pub async fn connect_with_config(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(&config.url, config.max_connections, config.timeout_secs).await
}

/// Opens a pool with foreign keys on. File databases are created when
/// missing; the conditional report write relies on WAL plus the busy
/// timeout to serialise competing writers instead of failing fast.
pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    let url = with_create_mode(database_url);
    SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                sqlx::query("PRAGMA busy_timeout = 5000").execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect(&url)
        .await
}

fn with_create_mode(database_url: &str) -> String {
    let is_file = database_url.starts_with("sqlite://") && !database_url.contains("mode=");
    if !is_file {
        return database_url.to_string();
    }
    let separator = if database_url.contains('?') { '&' } else { '?' };
    format!("{database_url}{separator}mode=rwc")
}

#[cfg(test)]
mod tests {
    use expenso_core::config::DatabaseConfig;

    use super::{connect_with_config, with_create_mode};

    #[test]
    fn file_urls_gain_create_mode() {
        assert_eq!(with_create_mode("sqlite://expenso.db"), "sqlite://expenso.db?mode=rwc");
        assert_eq!(
            with_create_mode("sqlite://expenso.db?cache=shared"),
            "sqlite://expenso.db?cache=shared&mode=rwc"
        );
        assert_eq!(with_create_mode("sqlite://expenso.db?mode=ro"), "sqlite://expenso.db?mode=ro");
        assert_eq!(with_create_mode("sqlite::memory:"), "sqlite::memory:");
    }

    #[tokio::test]
    async fn config_settings_open_a_usable_pool() {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            timeout_secs: 5,
        };
        let pool = connect_with_config(&config).await.expect("connect");
        let one: i64 = sqlx::query_scalar("SELECT 1").fetch_one(&pool).await.expect("select");
        assert_eq!(one, 1);
    }
}
