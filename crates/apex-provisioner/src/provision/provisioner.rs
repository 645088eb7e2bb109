//! The provisioning run.
//!
//! Statements go out one at a time over a single pooled connection. Each
//! object is checked against the system catalogs first, then created with a
//! guarded statement; a failure is recorded against that object and the run
//! moves on. Only a failure to obtain the connection aborts.
//!
//! Runs against the same schema are serialised with a session advisory lock,
//! so concurrent `CREATE OR REPLACE` and `GRANT` statements never collide on
//! the same catalog row.

use sqlx::pool::PoolConnection;
use sqlx::{PgConnection, PgPool, Postgres};
use tracing::{debug, info, warn};

use super::grants;
use super::outcome::{error_reason, outcome_from_error, ObjectKind, ObjectOutcome, ProvisionReport};
use super::verify;
use crate::config::Config;
use crate::error::{ProvisionError, Result};
use crate::schema::{ddl, Catalog, SeedRow, SeedValue};

pub struct Provisioner {
    config: Config,
    catalog: Catalog,
    pool: PgPool,
}

impl Provisioner {
    pub fn new(config: Config, catalog: Catalog, pool: PgPool) -> Self {
        Self { config, catalog, pool }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    async fn acquire(&self) -> Result<PoolConnection<Postgres>> {
        self.pool.acquire().await.map_err(|e| ProvisionError::Connect {
            target: self.config.target(),
            source: e,
        })
    }

    /// Takes the per-schema advisory lock. Without it the run still proceeds
    /// and a concurrent run may race it.
    async fn lock(&self, conn: &mut PgConnection, report: &mut ProvisionReport) -> bool {
        match sqlx::query("SELECT pg_advisory_lock(hashtext($1))")
            .bind(lock_key(&self.config.schema))
            .execute(conn)
            .await
        {
            Ok(_) => {
                debug!("holding provisioning lock for schema '{}'", self.config.schema);
                true
            }
            Err(e) => {
                report.warn(format!("could not take provisioning lock: {}", error_reason(&e)));
                false
            }
        }
    }

    async fn unlock(&self, conn: &mut PgConnection) {
        if let Err(e) = sqlx::query("SELECT pg_advisory_unlock(hashtext($1))")
            .bind(lock_key(&self.config.schema))
            .execute(conn)
            .await
        {
            warn!("failed to release provisioning lock: {}", e);
        }
    }

    /// Full run: schema, tables, indexes, triggers, grants, seeds, then row
    /// count verification.
    pub async fn run(&self) -> Result<ProvisionReport> {
        let mut conn = self.acquire().await?;
        let conn: &mut PgConnection = &mut conn;
        let mut report = ProvisionReport::new();
        let locked = self.lock(conn, &mut report).await;

        info!(
            "Provisioning {} tables into schema '{}' on {}",
            self.catalog.tables.len(),
            self.config.schema,
            self.config.target()
        );
        if let Err(e) = self.catalog.check_order() {
            report.warn(e.to_string());
        }

        self.ensure_schema(conn, &mut report).await;
        self.create_tables(conn, &mut report).await;
        self.create_indexes(conn, &mut report).await;
        self.install_triggers(conn, &mut report).await;
        report.merge(grants::apply_grants(conn, &self.config, &self.catalog).await);
        if self.config.seed_data {
            self.insert_seeds(conn, &mut report).await;
            self.verify_counts(conn, &mut report).await;
        } else {
            info!("Seed data disabled; skipping seeds and verification");
        }
        if locked {
            self.unlock(conn).await;
        }

        info!(
            "Provisioning finished: {} object(s), {} failed, {} warning(s)",
            report.objects.len(),
            report.failures().count(),
            report.warnings.len()
        );
        Ok(report)
    }

    /// Row-count verification only.
    pub async fn verify(&self) -> Result<ProvisionReport> {
        let mut conn = self.acquire().await?;
        let mut report = ProvisionReport::new();
        self.verify_counts(&mut conn, &mut report).await;
        Ok(report)
    }

    /// Permission step only.
    pub async fn grant(&self) -> Result<ProvisionReport> {
        let mut conn = self.acquire().await?;
        let mut report = ProvisionReport::new();
        let locked = self.lock(&mut conn, &mut report).await;
        report.merge(grants::apply_grants(&mut conn, &self.config, &self.catalog).await);
        if locked {
            self.unlock(&mut conn).await;
        }
        Ok(report)
    }

    async fn ensure_schema(&self, conn: &mut PgConnection, report: &mut ProvisionReport) {
        let schema = &self.config.schema;
        let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM pg_namespace WHERE nspname = $1)")
            .bind(schema)
            .fetch_one(&mut *conn)
            .await;
        let outcome = match exists {
            Ok(true) => ObjectOutcome::AlreadyExisted,
            Ok(false) => execute(conn, &ddl::create_schema(schema)).await,
            Err(e) => outcome_from_error(&e),
        };
        report.record(ObjectKind::Schema, schema.clone(), outcome);
    }

    async fn create_tables(&self, conn: &mut PgConnection, report: &mut ProvisionReport) {
        for table in &self.catalog.tables {
            let outcome = match self.relation_exists(conn, table.name).await {
                Ok(true) => ObjectOutcome::AlreadyExisted,
                Ok(false) => execute(conn, &ddl::create_table(table)).await,
                Err(e) => outcome_from_error(&e),
            };
            report.record(ObjectKind::Table, table.name, outcome);
        }
    }

    async fn create_indexes(&self, conn: &mut PgConnection, report: &mut ProvisionReport) {
        for index in &self.catalog.indexes {
            let outcome = match self.relation_exists(conn, index.name).await {
                Ok(true) => ObjectOutcome::AlreadyExisted,
                Ok(false) => execute(conn, &ddl::create_index(index)).await,
                Err(e) => outcome_from_error(&e),
            };
            report.record(ObjectKind::Index, index.name, outcome);
        }
    }

    /// Functions are always replaced so their bodies track the catalog; a
    /// trigger is only created when absent.
    async fn install_triggers(&self, conn: &mut PgConnection, report: &mut ProvisionReport) {
        for trigger in self.catalog.triggers() {
            let outcome = match self.function_exists(conn, &trigger.function_name).await {
                Ok(existed) => replaced(existed, execute(conn, &trigger.function_sql).await),
                Err(e) => outcome_from_error(&e),
            };
            report.record(ObjectKind::Function, trigger.function_name.clone(), outcome);

            let outcome = match self.trigger_exists(conn, &trigger.trigger_name, trigger.table).await {
                Ok(true) => ObjectOutcome::AlreadyExisted,
                Ok(false) => execute(conn, &trigger.trigger_sql).await,
                Err(e) => outcome_from_error(&e),
            };
            report.record(
                ObjectKind::Trigger,
                format!("{} on {}", trigger.trigger_name, trigger.table),
                outcome,
            );
        }
    }

    async fn insert_seeds(&self, conn: &mut PgConnection, report: &mut ProvisionReport) {
        for seed in &self.catalog.seeds {
            let outcome = match insert_seed(conn, seed).await {
                Ok(0) => ObjectOutcome::AlreadyExisted,
                Ok(_) => ObjectOutcome::Created,
                Err(e) => outcome_from_error(&e),
            };
            report.record(ObjectKind::Seed, format!("{}: {}", seed.table, seed.label), outcome);
        }
    }

    async fn verify_counts(&self, conn: &mut PgConnection, report: &mut ProvisionReport) {
        let expected = self.catalog.expected_counts();
        if expected.is_empty() {
            return;
        }
        let checks = verify::verify_counts(conn, &expected).await;
        for check in &checks {
            if let Some(warning) = check.warning() {
                report.warn(warning);
            }
        }
        report.count_checks.extend(checks);

        match verify::relationship_count(conn).await {
            Ok(n) => info!("Monitor relationships configured: {}", n),
            Err(e) => debug!("relationship count unavailable: {}", e),
        }
    }

    fn qualified(&self, name: &str) -> String {
        format!("{}.{}", ddl::quote_ident(&self.config.schema), name)
    }

    async fn relation_exists(&self, conn: &mut PgConnection, name: &str) -> std::result::Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>("SELECT to_regclass($1) IS NOT NULL")
            .bind(self.qualified(name))
            .fetch_one(conn)
            .await
    }

    async fn function_exists(&self, conn: &mut PgConnection, name: &str) -> std::result::Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM pg_proc p JOIN pg_namespace n ON n.oid = p.pronamespace \
             WHERE n.nspname = $1 AND p.proname = $2)",
        )
        .bind(&self.config.schema)
        .bind(name)
        .fetch_one(conn)
        .await
    }

    async fn trigger_exists(
        &self,
        conn: &mut PgConnection,
        trigger: &str,
        table: &str,
    ) -> std::result::Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM pg_trigger t \
             JOIN pg_class c ON c.oid = t.tgrelid \
             JOIN pg_namespace n ON n.oid = c.relnamespace \
             WHERE n.nspname = $1 AND c.relname = $2 AND t.tgname = $3 AND NOT t.tgisinternal)",
        )
        .bind(&self.config.schema)
        .bind(table)
        .bind(trigger)
        .fetch_one(conn)
        .await
    }
}

async fn execute(conn: &mut PgConnection, sql: &str) -> ObjectOutcome {
    debug!("executing: {}", sql);
    match sqlx::query(sql).execute(conn).await {
        Ok(_) => ObjectOutcome::Created,
        Err(e) => {
            let outcome = outcome_from_error(&e);
            if outcome == ObjectOutcome::AlreadyExisted {
                warn!("object appeared concurrently: {}", e);
            }
            outcome
        }
    }
}

fn lock_key(schema: &str) -> String {
    format!("apex-provisioner:{}", schema)
}

/// Outcome of a `CREATE OR REPLACE` given whether the object was already there.
fn replaced(existed: bool, executed: ObjectOutcome) -> ObjectOutcome {
    match executed {
        ObjectOutcome::Created if existed => ObjectOutcome::AlreadyExisted,
        other => other,
    }
}

/// Rows inserted: 1, or 0 when a unique constraint already holds the row.
async fn insert_seed(conn: &mut PgConnection, seed: &SeedRow) -> std::result::Result<u64, sqlx::Error> {
    let sql = ddl::insert_seed(seed);
    let mut query = sqlx::query(&sql);
    for (_, value) in &seed.values {
        query = match value {
            SeedValue::Text(s) => query.bind(s.as_str()),
            SeedValue::Int(i) => query.bind(*i),
            SeedValue::Float(f) => query.bind(*f),
            SeedValue::Bool(b) => query.bind(*b),
            SeedValue::Json(v) => query.bind(sqlx::types::Json(v)),
            SeedValue::TextArray(items) => query.bind(items.clone()),
        };
    }
    Ok(query.execute(conn).await?.rows_affected())
}
