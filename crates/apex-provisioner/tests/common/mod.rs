//! Shared setup for database-backed tests.
//!
//! Tests run only when `APEX_TEST_DATABASE_URL` points at a PostgreSQL server
//! the caller may create schemas (and, for the permission tests, roles) on.
//! Each test gets a fresh schema that `teardown` drops.

#![allow(dead_code)]

use apex_provisioner::{db, Config};
use sqlx::{Connection, PgConnection, PgPool};

pub const DATABASE_URL_VAR: &str = "APEX_TEST_DATABASE_URL";

pub struct TestDb {
    pub config: Config,
    pub pool: PgPool,
}

pub fn database_url() -> Option<String> {
    match std::env::var(DATABASE_URL_VAR) {
        Ok(url) if !url.trim().is_empty() => Some(url),
        _ => {
            eprintln!("skipping: {} is not set", DATABASE_URL_VAR);
            None
        }
    }
}

pub fn unique_name(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
}

impl TestDb {
    pub async fn new() -> Option<Self> {
        let url = database_url()?;
        let config = Config {
            database_url: Some(url),
            schema: unique_name("apex_test"),
            ..Config::default()
        };
        let pool = db::connect(&config).await.expect("connect to test database");
        Some(Self { config, pool })
    }

    pub fn schema(&self) -> &str {
        &self.config.schema
    }

    pub async fn count(&self, table: &str) -> i64 {
        sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&self.pool)
            .await
            .expect("count rows")
    }

    pub async fn teardown(self) {
        sqlx::query(&format!("DROP SCHEMA IF EXISTS \"{}\" CASCADE", self.config.schema))
            .execute(&self.pool)
            .await
            .expect("drop test schema");
        self.pool.close().await;
    }
}

/// Drops a role created by a test. Call after `teardown` so no schema objects
/// still reference it.
pub async fn drop_role(role: &str) {
    let Some(url) = database_url() else { return };
    let mut admin = PgConnection::connect(&url).await.expect("connect for role cleanup");
    sqlx::query(&format!("DROP ROLE IF EXISTS \"{}\"", role))
        .execute(&mut admin)
        .await
        .unwrap_or_else(|e| panic!("drop role {}: {}", role, e));
    admin.close().await.expect("close cleanup connection");
}
