//! Permission step: schema usage, table privileges, sequences and optional
//! ownership transfer for the application role.

use sqlx::PgConnection;
use tracing::{debug, info, warn};

use super::outcome::{classify_error, error_reason, ErrorClass, ObjectKind, ObjectOutcome, ProvisionReport};
use super::remediation::{default_chain, run_chain, RemediationContext, RemediationOutcome, RemediationStrategy};
use crate::config::Config;
use crate::schema::{ddl, Catalog};

/// How to tell whether a grant is already in effect for the role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrivilegeCheck {
    SchemaUsage(String),
    /// Schema-qualified table name.
    Table(String),
    /// Every sequence in the schema.
    Sequences(String),
    Owner(String),
}

impl PrivilegeCheck {
    /// A boolean query taking the role as `$1` and the object as `$2`.
    pub fn sql(&self) -> &'static str {
        match self {
            PrivilegeCheck::SchemaUsage(_) => "SELECT has_schema_privilege($1, $2, 'USAGE')",
            PrivilegeCheck::Table(_) => {
                "SELECT has_table_privilege($1, $2, 'SELECT') AND has_table_privilege($1, $2, 'INSERT') \
                 AND has_table_privilege($1, $2, 'UPDATE') AND has_table_privilege($1, $2, 'DELETE')"
            }
            PrivilegeCheck::Sequences(_) => {
                "SELECT COALESCE(bool_and(has_sequence_privilege($1, c.oid, 'USAGE') \
                 AND has_sequence_privilege($1, c.oid, 'SELECT')), true) \
                 FROM pg_class c JOIN pg_namespace n ON n.oid = c.relnamespace \
                 WHERE c.relkind = 'S' AND n.nspname = $2"
            }
            PrivilegeCheck::Owner(_) => {
                "SELECT COALESCE((SELECT pg_get_userbyid(relowner) = $1 FROM pg_class WHERE oid = to_regclass($2)), false)"
            }
        }
    }

    pub fn object(&self) -> &str {
        match self {
            PrivilegeCheck::SchemaUsage(o)
            | PrivilegeCheck::Table(o)
            | PrivilegeCheck::Sequences(o)
            | PrivilegeCheck::Owner(o) => o,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantStatement {
    /// Report name, e.g. `usage on schema public` or `users`.
    pub name: String,
    pub sql: String,
    pub check: PrivilegeCheck,
}

/// Every statement the permission step issues for `role`, in order.
pub fn grant_statements(config: &Config, catalog: &Catalog, role: &str) -> Vec<GrantStatement> {
    let qualified = |table: &str| format!("{}.{}", ddl::quote_ident(&config.schema), table);

    let mut out = vec![GrantStatement {
        name: format!("usage on schema {}", config.schema),
        sql: ddl::grant_schema_usage(&config.schema, role),
        check: PrivilegeCheck::SchemaUsage(config.schema.clone()),
    }];
    for table in &catalog.tables {
        out.push(GrantStatement {
            name: table.name.to_string(),
            sql: ddl::grant_table(table.name, role),
            check: PrivilegeCheck::Table(qualified(table.name)),
        });
    }
    out.push(GrantStatement {
        name: format!("sequences in {}", config.schema),
        sql: ddl::grant_sequences(&config.schema, role),
        check: PrivilegeCheck::Sequences(config.schema.clone()),
    });
    if config.transfer_ownership {
        for table in &catalog.tables {
            out.push(GrantStatement {
                name: format!("owner of {}", table.name),
                sql: ddl::transfer_ownership(table.name, role),
                check: PrivilegeCheck::Owner(qualified(table.name)),
            });
        }
    }
    out
}

/// The role to grant to, or `None` when the step should be skipped.
pub fn target_role<'a>(config: &'a Config, current_user: &str) -> Option<&'a str> {
    match config.app_role.as_deref() {
        None => None,
        Some(role) if role == current_user => None,
        Some(role) => Some(role),
    }
}

/// Whether `role` already holds what `stmt` would grant. A failed lookup
/// (e.g. a table that was never created) is treated as not held so the grant
/// itself reports the real error.
async fn already_held(conn: &mut PgConnection, role: &str, stmt: &GrantStatement) -> bool {
    match sqlx::query_scalar::<_, bool>(stmt.check.sql())
        .bind(role)
        .bind(stmt.check.object())
        .fetch_one(conn)
        .await
    {
        Ok(held) => held,
        Err(e) => {
            debug!("privilege check for {} unavailable: {}", stmt.name, e);
            false
        }
    }
}

pub async fn apply_grants(conn: &mut PgConnection, config: &Config, catalog: &Catalog) -> ProvisionReport {
    apply_grants_with(conn, config, catalog, &default_chain()).await
}

pub async fn apply_grants_with(
    conn: &mut PgConnection,
    config: &Config,
    catalog: &Catalog,
    chain: &[Box<dyn RemediationStrategy>],
) -> ProvisionReport {
    let mut report = ProvisionReport::new();

    let current_user = match sqlx::query_scalar::<_, String>("SELECT current_user::text")
        .fetch_one(&mut *conn)
        .await
    {
        Ok(user) => user,
        Err(e) => {
            report.record(ObjectKind::Grant, "current_user", ObjectOutcome::Failed(error_reason(&e)));
            return report;
        }
    };

    let Some(role) = target_role(config, &current_user) else {
        info!("Skipping grants: no separate application role configured");
        return report;
    };

    let role_exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM pg_roles WHERE rolname = $1)")
        .bind(role)
        .fetch_one(&mut *conn)
        .await;
    match role_exists {
        Ok(true) => {}
        Ok(false) => {
            report.record(
                ObjectKind::Grant,
                format!("role {}", role),
                ObjectOutcome::Failed(format!("role \"{}\" does not exist", role)),
            );
            return report;
        }
        Err(e) => {
            report.record(ObjectKind::Grant, format!("role {}", role), ObjectOutcome::Failed(error_reason(&e)));
            return report;
        }
    }

    info!("Granting {} to {}", ddl::TABLE_PRIVILEGES, role);
    let mut denied: Vec<GrantStatement> = Vec::new();
    for stmt in grant_statements(config, catalog, role) {
        if already_held(conn, role, &stmt).await {
            report.record(ObjectKind::Grant, stmt.name.clone(), ObjectOutcome::AlreadyExisted);
            continue;
        }
        match sqlx::query(&stmt.sql).execute(&mut *conn).await {
            Ok(_) => report.record(ObjectKind::Grant, stmt.name.clone(), ObjectOutcome::Created),
            Err(e) => {
                if classify_error(&e) == ErrorClass::PermissionDenied {
                    denied.push(stmt.clone());
                }
                report.record(ObjectKind::Grant, stmt.name.clone(), ObjectOutcome::Failed(error_reason(&e)));
            }
        }
    }

    if denied.is_empty() {
        return report;
    }

    warn!("{} grant statement(s) were denied; trying remediation", denied.len());
    let ctx = RemediationContext {
        config,
        current_user: &current_user,
        statements: denied.iter().map(|s| s.sql.clone()).collect(),
    };
    let trail = run_chain(chain, &ctx).await;
    if matches!(trail.last(), Some((_, RemediationOutcome::Resolved))) {
        for stmt in &denied {
            report.resolve(ObjectKind::Grant, &stmt.name, ObjectOutcome::Created);
        }
    }
    report.remediation = trail;
    report
}
