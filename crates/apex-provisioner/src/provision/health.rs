//! `check`: server version plus presence of every catalog table.

use serde::Serialize;
use sqlx::PgConnection;

use crate::schema::ddl::quote_ident;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TablePresence {
    pub table: String,
    pub present: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub server_version: String,
    pub schema: String,
    pub tables: Vec<TablePresence>,
}

impl HealthReport {
    pub fn missing(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().filter(|t| !t.present).map(|t| t.table.as_str())
    }

    pub fn all_present(&self) -> bool {
        self.tables.iter().all(|t| t.present)
    }
}

pub async fn check(conn: &mut PgConnection, schema: &str, tables: &[&str]) -> Result<HealthReport, sqlx::Error> {
    let server_version = sqlx::query_scalar::<_, String>("SHOW server_version")
        .fetch_one(&mut *conn)
        .await?;

    let qualified: Vec<String> = tables
        .iter()
        .map(|t| format!("{}.{}", quote_ident(schema), t))
        .collect();
    let present: Vec<bool> = sqlx::query_scalar(
        "SELECT to_regclass(name) IS NOT NULL FROM unnest($1::text[]) WITH ORDINALITY AS t(name, pos) ORDER BY pos",
    )
    .bind(&qualified)
    .fetch_all(&mut *conn)
    .await?;

    Ok(HealthReport {
        server_version,
        schema: schema.to_string(),
        tables: tables
            .iter()
            .zip(present)
            .map(|(table, present)| TablePresence {
                table: table.to_string(),
                present,
            })
            .collect(),
    })
}
