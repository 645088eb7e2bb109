//! Declarative description of the target schema.
//!
//! Tables, indexes, trigger-maintained columns and seed rows are plain data;
//! [`ddl`](super::ddl) turns them into statements. Adding a column type means
//! extending [`ColumnType::sql`] and nothing else.

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Serial,
    Integer,
    BigInt,
    Real,
    DoublePrecision,
    Text,
    Varchar(u16),
    Boolean,
    Timestamptz,
    Jsonb,
    TextArray,
}

impl ColumnType {
    pub fn sql(&self) -> String {
        match self {
            ColumnType::Serial => "SERIAL".into(),
            ColumnType::Integer => "INTEGER".into(),
            ColumnType::BigInt => "BIGINT".into(),
            ColumnType::Real => "REAL".into(),
            ColumnType::DoublePrecision => "DOUBLE PRECISION".into(),
            ColumnType::Text => "TEXT".into(),
            ColumnType::Varchar(n) => format!("VARCHAR({})", n),
            ColumnType::Boolean => "BOOLEAN".into(),
            ColumnType::Timestamptz => "TIMESTAMPTZ".into(),
            ColumnType::Jsonb => "JSONB".into(),
            ColumnType::TextArray => "TEXT[]".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    Now,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(&'static str),
    /// JSON literal, e.g. `{}` or `[]`.
    Json(&'static str),
    EmptyArray,
    /// Verbatim SQL expression.
    Expr(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDelete {
    Cascade,
    SetNull,
    Restrict,
    NoAction,
}

impl OnDelete {
    pub fn sql(&self) -> &'static str {
        match self {
            OnDelete::Cascade => "CASCADE",
            OnDelete::SetNull => "SET NULL",
            OnDelete::Restrict => "RESTRICT",
            OnDelete::NoAction => "NO ACTION",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub table: &'static str,
    pub column: &'static str,
    pub on_delete: OnDelete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub ty: ColumnType,
    pub nullable: bool,
    pub primary_key: bool,
    pub unique: bool,
    pub default: Option<DefaultValue>,
    pub references: Option<ForeignKey>,
    /// Allowed literal values, emitted as `CHECK (col IN (...))`.
    pub one_of: Option<&'static [&'static str]>,
    pub check: Option<&'static str>,
}

impl ColumnSpec {
    pub fn new(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            nullable: true,
            primary_key: false,
            unique: false,
            default: None,
            references: None,
            one_of: None,
            check: None,
        }
    }

    /// `SERIAL PRIMARY KEY`
    pub fn id(name: &'static str) -> Self {
        Self::new(name, ColumnType::Serial).primary_key()
    }

    /// `TIMESTAMPTZ NOT NULL DEFAULT NOW()`
    pub fn timestamp(name: &'static str) -> Self {
        Self::new(name, ColumnType::Timestamptz)
            .not_null()
            .default(DefaultValue::Now)
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default(mut self, value: DefaultValue) -> Self {
        self.default = Some(value);
        self
    }

    pub fn references(mut self, table: &'static str, column: &'static str, on_delete: OnDelete) -> Self {
        self.references = Some(ForeignKey { table, column, on_delete });
        self
    }

    pub fn one_of(mut self, values: &'static [&'static str]) -> Self {
        self.one_of = Some(values);
        self
    }

    pub fn check(mut self, expr: &'static str) -> Self {
        self.check = Some(expr);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableSpec {
    pub name: &'static str,
    pub columns: Vec<ColumnSpec>,
    pub unique: Vec<Vec<&'static str>>,
    pub checks: Vec<&'static str>,
}

impl TableSpec {
    pub fn new(name: &'static str, columns: Vec<ColumnSpec>) -> Self {
        Self {
            name,
            columns,
            unique: Vec::new(),
            checks: Vec::new(),
        }
    }

    pub fn unique(mut self, columns: &[&'static str]) -> Self {
        self.unique.push(columns.to_vec());
        self
    }

    pub fn check(mut self, expr: &'static str) -> Self {
        self.checks.push(expr);
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item = (&ColumnSpec, &ForeignKey)> {
        self.columns
            .iter()
            .filter_map(|c| c.references.as_ref().map(|fk| (c, fk)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: &'static str,
    pub table: &'static str,
    /// Column names or expressions.
    pub keys: Vec<&'static str>,
    pub unique: bool,
    pub predicate: Option<&'static str>,
}

impl IndexSpec {
    pub fn new(name: &'static str, table: &'static str, keys: &[&'static str]) -> Self {
        Self {
            name,
            table,
            keys: keys.to_vec(),
            unique: false,
            predicate: None,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn partial(mut self, predicate: &'static str) -> Self {
        self.predicate = Some(predicate);
        self
    }
}

/// A parent column kept equal to `COUNT(*)` of the child rows pointing at it.
///
/// The count is always re-aggregated, never incremented, so a missed event
/// cannot leave it permanently off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedCount {
    pub name: &'static str,
    pub parent_table: &'static str,
    pub parent_key: &'static str,
    pub count_column: &'static str,
    pub stamp_column: Option<&'static str>,
    pub child_table: &'static str,
    pub child_fk: &'static str,
    /// Also fire on `UPDATE OF child_fk` and recount both the old and new parent.
    pub track_reparenting: bool,
}

/// Forward-only status column: a row may stay in its stage or move to a
/// later one, and nothing leaves the final stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusProgression {
    pub name: &'static str,
    pub table: &'static str,
    pub column: &'static str,
    pub stages: Vec<Vec<&'static str>>,
}

impl StatusProgression {
    pub fn rank(&self, status: &str) -> Option<usize> {
        self.stages.iter().position(|stage| stage.contains(&status))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SeedValue {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Json(Value),
    TextArray(Vec<String>),
}

impl From<&str> for SeedValue {
    fn from(s: &str) -> Self {
        SeedValue::Text(s.to_string())
    }
}

impl From<i64> for SeedValue {
    fn from(v: i64) -> Self {
        SeedValue::Int(v)
    }
}

impl From<f64> for SeedValue {
    fn from(v: f64) -> Self {
        SeedValue::Float(v)
    }
}

impl From<bool> for SeedValue {
    fn from(v: bool) -> Self {
        SeedValue::Bool(v)
    }
}

/// One fixed row. Its natural key is whatever unique constraint the table
/// declares; a conflicting row is skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct SeedRow {
    pub table: &'static str,
    pub label: String,
    pub values: Vec<(&'static str, SeedValue)>,
}

impl SeedRow {
    pub fn new(table: &'static str, label: impl Into<String>) -> Self {
        Self {
            table,
            label: label.into(),
            values: Vec::new(),
        }
    }

    pub fn set(mut self, column: &'static str, value: impl Into<SeedValue>) -> Self {
        self.values.push((column, value.into()));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_type_sql() {
        assert_eq!(ColumnType::Varchar(255).sql(), "VARCHAR(255)");
        assert_eq!(ColumnType::TextArray.sql(), "TEXT[]");
        assert_eq!(ColumnType::Timestamptz.sql(), "TIMESTAMPTZ");
    }

    #[test]
    fn test_primary_key_implies_not_null() {
        let col = ColumnSpec::id("id");
        assert!(col.primary_key);
        assert!(!col.nullable);
    }

    #[test]
    fn test_foreign_keys_iterates_only_references() {
        let table = TableSpec::new(
            "cameras",
            vec![
                ColumnSpec::id("id"),
                ColumnSpec::new("property_id", ColumnType::Integer).references(
                    "properties",
                    "id",
                    OnDelete::Cascade,
                ),
                ColumnSpec::new("name", ColumnType::Text),
            ],
        );
        let fks: Vec<_> = table.foreign_keys().map(|(c, fk)| (c.name, fk.table)).collect();
        assert_eq!(fks, vec![("property_id", "properties")]);
    }

    #[test]
    fn test_status_rank_groups_terminal_states() {
        let progression = StatusProgression {
            name: "guard",
            table: "t",
            column: "status",
            stages: vec![vec!["pending"], vec!["active"], vec!["done", "failed"]],
        };
        assert_eq!(progression.rank("pending"), Some(0));
        assert_eq!(progression.rank("failed"), Some(2));
        assert_eq!(progression.rank("done"), progression.rank("failed"));
        assert_eq!(progression.rank("unknown"), None);
    }
}
