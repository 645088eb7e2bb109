//! Post-run row-count verification. Mismatches are advisory only.

use sqlx::PgConnection;
use tracing::debug;

use super::outcome::error_reason;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CountStatus {
    Ok,
    Below,
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountCheck {
    pub table: String,
    pub expected_min: i64,
    pub actual: Option<i64>,
    pub status: CountStatus,
}

impl CountCheck {
    pub fn evaluate(table: &str, expected_min: i64, actual: Result<i64, String>) -> Self {
        let (actual, status) = match actual {
            Ok(n) if n >= expected_min => (Some(n), CountStatus::Ok),
            Ok(n) => (Some(n), CountStatus::Below),
            Err(e) => (None, CountStatus::Unavailable(e)),
        };
        Self {
            table: table.to_string(),
            expected_min,
            actual,
            status,
        }
    }

    pub fn warning(&self) -> Option<String> {
        match &self.status {
            CountStatus::Ok => None,
            CountStatus::Below => Some(format!(
                "{} has {} row(s), expected at least {}",
                self.table,
                self.actual.unwrap_or_default(),
                self.expected_min
            )),
            CountStatus::Unavailable(e) => Some(format!("could not count {}: {}", self.table, e)),
        }
    }
}

pub async fn count_rows(conn: &mut PgConnection, table: &str) -> Result<i64, sqlx::Error> {
    // Table names come from the catalog, never from input.
    sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(conn)
        .await
}

/// Number of seeded or operator-defined monitor pairs.
pub async fn relationship_count(conn: &mut PgConnection) -> Result<i64, sqlx::Error> {
    count_rows(conn, "monitor_relationships").await
}

pub async fn verify_counts(conn: &mut PgConnection, expected: &[(&str, i64)]) -> Vec<CountCheck> {
    let mut checks = Vec::with_capacity(expected.len());
    for (table, min) in expected {
        let actual = count_rows(&mut *conn, table).await.map_err(|e| error_reason(&e));
        let check = CountCheck::evaluate(table, *min, actual);
        debug!(table = %check.table, actual = ?check.actual, expected = check.expected_min, "row count");
        checks.push(check);
    }
    checks
}
