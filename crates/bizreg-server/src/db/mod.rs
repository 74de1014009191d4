use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use thiserror::Error;

use crate::config::DatabaseConfig;

/// Database operation errors with contextual information
#[derive(Error, Debug)]
pub enum DbError {
    /// SQL query or connection error
    #[error("Database query failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Database migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// Database configuration is invalid or missing
    #[error("Database configuration error: {0}. Check DATABASE_URL and connection settings.")]
    Config(String),
}

impl DbError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: Option<u64>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::from(&DatabaseConfig::default())
    }
}

impl From<&DatabaseConfig> for DbConfig {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            url: config.url.clone(),
            max_connections: config.max_connections,
            min_connections: config.min_connections,
            connect_timeout_secs: config.connect_timeout_secs,
            idle_timeout_secs: Some(config.idle_timeout_secs).filter(|secs| *secs > 0),
        }
    }
}

impl DbConfig {
    /// Pool settings for tools that do not load the full server config
    pub fn from_env() -> DbResult<Self> {
        dotenvy::dotenv().ok();
        let defaults = DatabaseConfig::default();

        let url = std::env::var("DATABASE_URL")
            .map_err(|_| DbError::config("DATABASE_URL not set"))?;

        let env_or = |name: &str, default: u64| {
            std::env::var(name)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default)
        };

        Ok(Self::from(&DatabaseConfig {
            url,
            max_connections: env_or("DATABASE_MAX_CONNECTIONS", defaults.max_connections.into())
                as u32,
            min_connections: env_or("DATABASE_MIN_CONNECTIONS", defaults.min_connections.into())
                as u32,
            connect_timeout_secs: env_or("DATABASE_CONNECT_TIMEOUT", defaults.connect_timeout_secs),
            idle_timeout_secs: env_or("DATABASE_IDLE_TIMEOUT", defaults.idle_timeout_secs),
        }))
    }
}

pub async fn create_pool(config: &DbConfig) -> DbResult<PgPool> {
    let mut options = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs));

    if let Some(idle_timeout) = config.idle_timeout_secs {
        options = options.idle_timeout(Duration::from_secs(idle_timeout));
    }

    let pool = options.connect(&config.url).await?;

    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Database connection pool created"
    );

    Ok(pool)
}

/// Apply pending schema migrations
pub async fn run_migrations(pool: &PgPool) -> DbResult<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    tracing::info!("Database migrations applied");
    Ok(())
}

pub async fn health_check(pool: &PgPool) -> DbResult<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map(|_| ())
        .map_err(DbError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config() {
        let config = DbConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 2);
        assert_eq!(config.idle_timeout_secs, Some(600));
    }

    #[test]
    #[serial]
    fn test_config_from_env() {
        std::env::set_var("DATABASE_URL", "postgresql://localhost/test");
        std::env::set_var("DATABASE_MAX_CONNECTIONS", "15");

        let config = DbConfig::from_env().unwrap();
        assert_eq!(config.max_connections, 15);
        assert!(config.url.contains("localhost/test"));

        std::env::remove_var("DATABASE_URL");
        std::env::remove_var("DATABASE_MAX_CONNECTIONS");
    }

    #[test]
    fn test_zero_idle_timeout_disables_it() {
        let config = DbConfig::from(&DatabaseConfig {
            idle_timeout_secs: 0,
            ..DatabaseConfig::default()
        });
        assert_eq!(config.idle_timeout_secs, None);
    }
}
