// apex-provisioner/src/db.rs

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::config::Config;
use crate::error::{ProvisionError, Result};

/// Statements run sequentially, so a run never needs more than one connection.
const MAX_CONNECTIONS: u32 = 2;

/// Opens the pool and proves the connection with a round trip. Any failure
/// here is fatal for the run.
pub async fn connect(config: &Config) -> Result<PgPool> {
    let options = config.connect_options()?;
    let pool = PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(config.connect_timeout())
        .connect_with(options)
        .await
        .map_err(|e| ProvisionError::Connect {
            target: config.target(),
            source: e,
        })?;

    info!("Connected to {}", config.target());
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_config() -> Config {
        Config {
            db_host: "127.0.0.1".into(),
            db_port: 1,
            connect_timeout_seconds: 1,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_unreachable_server_is_a_connect_error() {
        let err = connect(&unreachable_config()).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Connect { .. }), "{:?}", err);
        assert!(err.to_string().contains("postgres://postgres@127.0.0.1:1/apex"));
    }

    #[tokio::test]
    async fn test_bad_url_fails_before_connecting() {
        let config = Config {
            database_url: Some("not a url".into()),
            ..Config::default()
        };
        assert!(matches!(connect(&config).await, Err(ProvisionError::Config(_))));
    }
}
