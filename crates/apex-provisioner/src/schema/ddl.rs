//! Statement emitter for the declarative schema model.
//!
//! Every statement is a single command so it can go through the extended
//! query protocol one at a time, and every `CREATE` is guarded so repeating
//! it is harmless.

use super::model::*;

/// Double-quotes an identifier that comes from configuration.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn default_sql(value: &DefaultValue) -> String {
    match value {
        DefaultValue::Now => "NOW()".into(),
        DefaultValue::Bool(b) => if *b { "TRUE".into() } else { "FALSE".into() },
        DefaultValue::Int(i) => i.to_string(),
        DefaultValue::Float(f) => f.to_string(),
        DefaultValue::Text(s) => quote_literal(s),
        DefaultValue::Json(s) => format!("{}::jsonb", quote_literal(s)),
        DefaultValue::EmptyArray => "'{}'".into(),
        DefaultValue::Expr(e) => (*e).to_string(),
    }
}

fn column_sql(col: &ColumnSpec) -> String {
    let mut sql = format!("{} {}", col.name, col.ty.sql());
    if col.primary_key {
        sql.push_str(" PRIMARY KEY");
    } else if !col.nullable {
        sql.push_str(" NOT NULL");
    }
    if col.unique {
        sql.push_str(" UNIQUE");
    }
    if let Some(default) = &col.default {
        sql.push_str(" DEFAULT ");
        sql.push_str(&default_sql(default));
    }
    if let Some(values) = col.one_of {
        let list: Vec<String> = values.iter().map(|v| quote_literal(v)).collect();
        sql.push_str(&format!(" CHECK ({} IN ({}))", col.name, list.join(", ")));
    }
    if let Some(expr) = col.check {
        sql.push_str(&format!(" CHECK ({})", expr));
    }
    if let Some(fk) = &col.references {
        sql.push_str(&format!(
            " REFERENCES {}({}) ON DELETE {}",
            fk.table,
            fk.column,
            fk.on_delete.sql()
        ));
    }
    sql
}

pub fn create_table(table: &TableSpec) -> String {
    let mut lines: Vec<String> = table.columns.iter().map(column_sql).collect();
    for cols in &table.unique {
        lines.push(format!("UNIQUE ({})", cols.join(", ")));
    }
    for expr in &table.checks {
        lines.push(format!("CHECK ({})", expr));
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        table.name,
        lines.join(",\n    ")
    )
}

pub fn create_index(index: &IndexSpec) -> String {
    let mut sql = format!(
        "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
        if index.unique { "UNIQUE " } else { "" },
        index.name,
        index.table,
        index.keys.join(", ")
    );
    if let Some(predicate) = index.predicate {
        sql.push_str(" WHERE ");
        sql.push_str(predicate);
    }
    sql
}

pub fn create_schema(schema: &str) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema))
}

/// A trigger function plus the trigger that calls it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerDdl {
    pub function_name: String,
    pub trigger_name: String,
    pub table: &'static str,
    pub function_sql: String,
    pub trigger_sql: String,
}

fn recount(spec: &DerivedCount, row: &str) -> String {
    let stamp = spec
        .stamp_column
        .map(|c| format!(", {} = NOW()", c))
        .unwrap_or_default();
    format!(
        "UPDATE {parent} SET {count} = (SELECT COUNT(*) FROM {child} WHERE {fk} = {row}.{fk}){stamp} \
         WHERE {key} = {row}.{fk};",
        parent = spec.parent_table,
        count = spec.count_column,
        child = spec.child_table,
        fk = spec.child_fk,
        key = spec.parent_key,
        row = row,
        stamp = stamp,
    )
}

pub fn derived_count(spec: &DerivedCount) -> TriggerDdl {
    let function_name = format!("refresh_{}", spec.name);
    let trigger_name = format!("trg_{}", spec.name);

    let (new_ops, old_ops, events) = if spec.track_reparenting {
        (
            "('INSERT', 'UPDATE')",
            "('DELETE', 'UPDATE')",
            format!("INSERT OR DELETE OR UPDATE OF {}", spec.child_fk),
        )
    } else {
        ("('INSERT')", "('DELETE')", "INSERT OR DELETE".to_string())
    };

    let function_sql = format!(
        "CREATE OR REPLACE FUNCTION {name}() RETURNS TRIGGER LANGUAGE plpgsql \
SET search_path FROM CURRENT AS $$
BEGIN
    IF TG_OP IN {new_ops} THEN
        {recount_new}
    END IF;
    IF TG_OP IN {old_ops} THEN
        {recount_old}
    END IF;
    RETURN NULL;
END;
$$",
        name = function_name,
        new_ops = new_ops,
        old_ops = old_ops,
        recount_new = recount(spec, "NEW"),
        recount_old = recount(spec, "OLD"),
    );

    let trigger_sql = format!(
        "CREATE TRIGGER {} AFTER {} ON {} FOR EACH ROW EXECUTE FUNCTION {}()",
        trigger_name, events, spec.child_table, function_name
    );

    TriggerDdl {
        function_name,
        trigger_name,
        table: spec.child_table,
        function_sql,
        trigger_sql,
    }
}

pub fn status_progression(spec: &StatusProgression) -> TriggerDdl {
    let function_name = format!("guard_{}", spec.name);
    let trigger_name = format!("trg_{}", spec.name);
    let terminal = spec.stages.len().saturating_sub(1);

    let rank_case = |row: &str| {
        let arms: Vec<String> = spec
            .stages
            .iter()
            .enumerate()
            .flat_map(|(rank, stage)| {
                stage
                    .iter()
                    .map(move |status| format!("WHEN {} THEN {}", quote_literal(status), rank))
            })
            .collect();
        format!("CASE {}.{} {} END", row, spec.column, arms.join(" "))
    };

    let function_sql = format!(
        "CREATE OR REPLACE FUNCTION {name}() RETURNS TRIGGER LANGUAGE plpgsql \
SET search_path FROM CURRENT AS $$
DECLARE
    old_rank INTEGER := {old_rank};
    new_rank INTEGER := {new_rank};
BEGIN
    IF NEW.{col} IS DISTINCT FROM OLD.{col} AND (old_rank >= {terminal} OR new_rank < old_rank) THEN
        RAISE EXCEPTION 'illegal {col} transition on %: % -> %', TG_TABLE_NAME, OLD.{col}, NEW.{col}
            USING ERRCODE = 'check_violation';
    END IF;
    RETURN NEW;
END;
$$",
        name = function_name,
        old_rank = rank_case("OLD"),
        new_rank = rank_case("NEW"),
        col = spec.column,
        terminal = terminal,
    );

    let trigger_sql = format!(
        "CREATE TRIGGER {} BEFORE UPDATE OF {} ON {} FOR EACH ROW EXECUTE FUNCTION {}()",
        trigger_name, spec.column, spec.table, function_name
    );

    TriggerDdl {
        function_name,
        trigger_name,
        table: spec.table,
        function_sql,
        trigger_sql,
    }
}

/// `INSERT ... ON CONFLICT DO NOTHING` with `$n` placeholders in column order.
pub fn insert_seed(row: &SeedRow) -> String {
    let columns: Vec<&str> = row.values.iter().map(|(c, _)| *c).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${}", i)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT DO NOTHING",
        row.table,
        columns.join(", "),
        placeholders.join(", ")
    )
}

pub const TABLE_PRIVILEGES: &str = "SELECT, INSERT, UPDATE, DELETE";

pub fn grant_schema_usage(schema: &str, role: &str) -> String {
    format!("GRANT USAGE ON SCHEMA {} TO {}", quote_ident(schema), quote_ident(role))
}

pub fn grant_table(table: &str, role: &str) -> String {
    format!("GRANT {} ON TABLE {} TO {}", TABLE_PRIVILEGES, table, quote_ident(role))
}

pub fn grant_sequences(schema: &str, role: &str) -> String {
    format!(
        "GRANT USAGE, SELECT ON ALL SEQUENCES IN SCHEMA {} TO {}",
        quote_ident(schema),
        quote_ident(role)
    )
}

pub fn transfer_ownership(table: &str, role: &str) -> String {
    format!("ALTER TABLE {} OWNER TO {}", table, quote_ident(role))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clients_and_properties() -> DerivedCount {
        DerivedCount {
            name: "client_property_count",
            parent_table: "clients",
            parent_key: "id",
            count_column: "property_count",
            stamp_column: Some("properties_updated_at"),
            child_table: "properties",
            child_fk: "client_id",
            track_reparenting: true,
        }
    }

    #[test]
    fn test_create_table_is_guarded_and_inlines_constraints() {
        let table = TableSpec::new(
            "monitor_relationships",
            vec![
                ColumnSpec::id("id"),
                ColumnSpec::new("monitor_a", ColumnType::Varchar(50)).not_null(),
                ColumnSpec::new("spatial_relationship", ColumnType::Varchar(20))
                    .not_null()
                    .default(DefaultValue::Text("adjacent"))
                    .one_of(&["adjacent", "isolated"]),
                ColumnSpec::new("transition_zones", ColumnType::Jsonb)
                    .not_null()
                    .default(DefaultValue::Json("[]")),
            ],
        )
        .unique(&["monitor_a", "spatial_relationship"]);

        let sql = create_table(&table);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS monitor_relationships ("));
        assert!(sql.contains("id SERIAL PRIMARY KEY"));
        assert!(sql.contains("monitor_a VARCHAR(50) NOT NULL"));
        assert!(sql.contains("DEFAULT 'adjacent' CHECK (spatial_relationship IN ('adjacent', 'isolated'))"));
        assert!(sql.contains("DEFAULT '[]'::jsonb"));
        assert!(sql.contains("UNIQUE (monitor_a, spatial_relationship)"));
    }

    #[test]
    fn test_foreign_key_is_inline() {
        let table = TableSpec::new(
            "properties",
            vec![ColumnSpec::new("client_id", ColumnType::Integer)
                .not_null()
                .references("clients", "id", OnDelete::Cascade)],
        );
        assert!(create_table(&table)
            .contains("client_id INTEGER NOT NULL REFERENCES clients(id) ON DELETE CASCADE"));
    }

    #[test]
    fn test_create_index_variants() {
        let plain = IndexSpec::new("idx_cameras_property", "cameras", &["property_id"]);
        assert_eq!(
            create_index(&plain),
            "CREATE INDEX IF NOT EXISTS idx_cameras_property ON cameras (property_id)"
        );

        let pair = IndexSpec::new(
            "idx_pair",
            "monitor_relationships",
            &["LEAST(monitor_a, monitor_b)", "GREATEST(monitor_a, monitor_b)"],
        )
        .unique();
        assert!(create_index(&pair).starts_with("CREATE UNIQUE INDEX IF NOT EXISTS idx_pair"));

        let partial = IndexSpec::new("idx_active", "threat_correlations", &["expires_at"])
            .partial("status = 'active'");
        assert!(create_index(&partial).ends_with("WHERE status = 'active'"));
    }

    #[test]
    fn test_derived_count_recounts_both_parents_on_reparent() {
        let ddl = derived_count(&clients_and_properties());

        assert_eq!(ddl.function_name, "refresh_client_property_count");
        assert_eq!(ddl.table, "properties");
        assert!(ddl.function_sql.contains("TG_OP IN ('INSERT', 'UPDATE')"));
        assert!(ddl.function_sql.contains("TG_OP IN ('DELETE', 'UPDATE')"));
        assert!(ddl.function_sql.contains(
            "UPDATE clients SET property_count = (SELECT COUNT(*) FROM properties WHERE client_id = OLD.client_id), properties_updated_at = NOW() WHERE id = OLD.client_id;"
        ));
        assert!(ddl.function_sql.contains("SET search_path FROM CURRENT"));
        assert_eq!(
            ddl.trigger_sql,
            "CREATE TRIGGER trg_client_property_count AFTER INSERT OR DELETE OR UPDATE OF client_id \
             ON properties FOR EACH ROW EXECUTE FUNCTION refresh_client_property_count()"
        );
    }

    #[test]
    fn test_derived_count_without_reparenting_covers_insert_delete_only() {
        let spec = DerivedCount {
            track_reparenting: false,
            stamp_column: None,
            ..clients_and_properties()
        };
        let ddl = derived_count(&spec);
        assert!(ddl.trigger_sql.contains("AFTER INSERT OR DELETE ON properties"));
        assert!(!ddl.function_sql.contains("'UPDATE'"));
        assert!(!ddl.function_sql.contains("NOW()"));
    }

    #[test]
    fn test_status_progression_ranks_every_state() {
        let spec = StatusProgression {
            name: "correlation_status",
            table: "threat_correlations",
            column: "status",
            stages: vec![vec!["pending"], vec!["active"], vec!["completed", "failed"]],
        };
        let ddl = status_progression(&spec);
        assert!(ddl.function_sql.contains("WHEN 'pending' THEN 0"));
        assert!(ddl.function_sql.contains("WHEN 'failed' THEN 2"));
        assert!(ddl.function_sql.contains("old_rank >= 2 OR new_rank < old_rank"));
        assert!(ddl.trigger_sql.contains("BEFORE UPDATE OF status ON threat_correlations"));
    }

    #[test]
    fn test_insert_seed_placeholders_follow_columns() {
        let row = SeedRow::new("monitor_relationships", "0-1")
            .set("monitor_a", "0")
            .set("monitor_b", "1")
            .set("confidence_multiplier", 1.3);
        assert_eq!(
            insert_seed(&row),
            "INSERT INTO monitor_relationships (monitor_a, monitor_b, confidence_multiplier) \
             VALUES ($1, $2, $3) ON CONFLICT DO NOTHING"
        );
    }

    #[test]
    fn test_grants_quote_role_and_schema() {
        assert_eq!(
            grant_table("users", "apex_app"),
            "GRANT SELECT, INSERT, UPDATE, DELETE ON TABLE users TO \"apex_app\""
        );
        assert_eq!(
            grant_schema_usage("public", "apex_app"),
            "GRANT USAGE ON SCHEMA \"public\" TO \"apex_app\""
        );
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
