//! The canonical APEX schema.
//!
//! Tables are listed in dependency order: every foreign key points at a table
//! that appears earlier. [`Catalog::validate_order`] checks that statically;
//! the provisioner itself simply walks the list.

use serde_json::json;

use super::ddl::{self, TriggerDdl};
use super::entities::{CorrelationStatus, HandoffStatus, SpatialRelationship};
use super::model::*;
use super::model::ColumnType::*;
use crate::error::ProvisionError;

#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    pub tables: Vec<TableSpec>,
    pub indexes: Vec<IndexSpec>,
    pub derived_counts: Vec<DerivedCount>,
    pub status_progressions: Vec<StatusProgression>,
    pub seeds: Vec<SeedRow>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderViolation {
    pub table: &'static str,
    pub column: &'static str,
    pub references: &'static str,
    /// The referenced table exists but is listed later.
    pub listed_later: bool,
}

impl std::fmt::Display for OrderViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.listed_later {
            write!(
                f,
                "{}.{} references {} which is created later",
                self.table, self.column, self.references
            )
        } else {
            write!(
                f,
                "{}.{} references unknown table {}",
                self.table, self.column, self.references
            )
        }
    }
}

impl Catalog {
    pub fn table(&self, name: &str) -> Option<&TableSpec> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn table_names(&self) -> Vec<&'static str> {
        self.tables.iter().map(|t| t.name).collect()
    }

    /// Foreign keys that point forward in the list or outside the catalog.
    /// Self-references are fine.
    pub fn validate_order(&self) -> Vec<OrderViolation> {
        let mut violations = Vec::new();
        for (pos, table) in self.tables.iter().enumerate() {
            for (col, fk) in table.foreign_keys() {
                if fk.table == table.name {
                    continue;
                }
                match self.tables.iter().position(|t| t.name == fk.table) {
                    Some(target) if target < pos => {}
                    found => violations.push(OrderViolation {
                        table: table.name,
                        column: col.name,
                        references: fk.table,
                        listed_later: found.is_some(),
                    }),
                }
            }
        }
        violations
    }

    /// [`validate_order`](Self::validate_order) folded into a single error.
    pub fn check_order(&self) -> Result<(), ProvisionError> {
        let violations = self.validate_order();
        if violations.is_empty() {
            return Ok(());
        }
        let details: Vec<String> = violations.iter().map(ToString::to_string).collect();
        Err(ProvisionError::Catalog(details.join("; ")))
    }

    pub fn triggers(&self) -> Vec<TriggerDdl> {
        self.derived_counts
            .iter()
            .map(ddl::derived_count)
            .chain(self.status_progressions.iter().map(ddl::status_progression))
            .collect()
    }

    /// Minimum row count per seeded table, in table order.
    pub fn expected_counts(&self) -> Vec<(&'static str, i64)> {
        self.tables
            .iter()
            .filter_map(|t| {
                let n = self.seeds.iter().filter(|s| s.table == t.name).count() as i64;
                (n > 0).then_some((t.name, n))
            })
            .collect()
    }

    pub fn without_seeds(mut self) -> Self {
        self.seeds.clear();
        self
    }
}

const USER_ROLES: &[&str] = &["admin", "manager", "supervisor", "guard", "client", "user"];
const GUARD_STATUSES: &[&str] = &["on_duty", "off_duty", "on_break", "unavailable"];
const CAMERA_STATUSES: &[&str] = &["online", "offline", "maintenance"];
const SCHEDULE_STATUSES: &[&str] = &["scheduled", "in_progress", "completed", "missed", "cancelled"];
const SEVERITIES: &[&str] = &["low", "medium", "high", "critical"];
const ALERT_STATUSES: &[&str] = &["pending", "acknowledged", "resolved", "dismissed"];
const THREAT_LEVELS: &[&str] = &["low", "medium", "high", "critical", "emergency"];

pub fn apex_catalog() -> Catalog {
    Catalog {
        tables: vec![
            users(),
            clients(),
            properties(),
            guards(),
            cameras(),
            schedules(),
            reports(),
            ai_alerts_log(),
            security_events(),
            monitor_relationships(),
            cross_monitor_threats(),
            threat_correlations(),
            threat_handoff_log(),
        ],
        indexes: indexes(),
        derived_counts: vec![
            DerivedCount {
                name: "client_property_count",
                parent_table: "clients",
                parent_key: "id",
                count_column: "property_count",
                stamp_column: Some("properties_updated_at"),
                child_table: "properties",
                child_fk: "client_id",
                track_reparenting: true,
            },
            DerivedCount {
                name: "correlation_handoff_count",
                parent_table: "threat_correlations",
                parent_key: "correlation_id",
                count_column: "handoff_count",
                stamp_column: Some("last_handoff_at"),
                child_table: "threat_handoff_log",
                child_fk: "correlation_id",
                track_reparenting: true,
            },
        ],
        status_progressions: vec![StatusProgression {
            name: "correlation_status",
            table: "threat_correlations",
            column: "status",
            stages: CorrelationStatus::stages(),
        }],
        seeds: seeds(),
    }
}

fn users() -> TableSpec {
    TableSpec::new(
        "users",
        vec![
            ColumnSpec::id("id"),
            ColumnSpec::new("first_name", Varchar(100)).not_null(),
            ColumnSpec::new("last_name", Varchar(100)).not_null(),
            ColumnSpec::new("email", Varchar(255)).not_null().unique(),
            ColumnSpec::new("password_hash", Text).not_null(),
            ColumnSpec::new("role", Varchar(30))
                .not_null()
                .default(DefaultValue::Text("user"))
                .one_of(USER_ROLES),
            ColumnSpec::new("phone", Varchar(50)),
            ColumnSpec::new("is_active", Boolean)
                .not_null()
                .default(DefaultValue::Bool(true)),
            ColumnSpec::new("last_login", Timestamptz),
            ColumnSpec::timestamp("created_at"),
            ColumnSpec::timestamp("updated_at"),
        ],
    )
}

fn clients() -> TableSpec {
    TableSpec::new(
        "clients",
        vec![
            ColumnSpec::id("id"),
            ColumnSpec::new("name", Varchar(255)).not_null(),
            ColumnSpec::new("email", Varchar(255)).not_null().unique(),
            ColumnSpec::new("phone", Varchar(50)),
            ColumnSpec::new("contact_person", Varchar(255)),
            ColumnSpec::new("is_active", Boolean)
                .not_null()
                .default(DefaultValue::Bool(true)),
            ColumnSpec::new("property_count", Integer)
                .not_null()
                .default(DefaultValue::Int(0)),
            ColumnSpec::new("properties_updated_at", Timestamptz),
            ColumnSpec::timestamp("created_at"),
            ColumnSpec::timestamp("updated_at"),
        ],
    )
}

fn properties() -> TableSpec {
    TableSpec::new(
        "properties",
        vec![
            ColumnSpec::id("id"),
            ColumnSpec::new("client_id", Integer)
                .not_null()
                .references("clients", "id", OnDelete::Cascade),
            ColumnSpec::new("name", Varchar(255)).not_null(),
            ColumnSpec::new("address", Text),
            ColumnSpec::new("city", Varchar(100)),
            ColumnSpec::new("state", Varchar(50)),
            ColumnSpec::new("zip_code", Varchar(20)),
            ColumnSpec::timestamp("created_at"),
            ColumnSpec::timestamp("updated_at"),
        ],
    )
}

fn guards() -> TableSpec {
    TableSpec::new(
        "guards",
        vec![
            ColumnSpec::id("id"),
            ColumnSpec::new("user_id", Integer)
                .not_null()
                .unique()
                .references("users", "id", OnDelete::Cascade),
            ColumnSpec::new("badge_number", Varchar(50)).unique(),
            ColumnSpec::new("status", Varchar(20))
                .not_null()
                .default(DefaultValue::Text("off_duty"))
                .one_of(GUARD_STATUSES),
            ColumnSpec::new("license_expires_at", Timestamptz),
            ColumnSpec::timestamp("created_at"),
        ],
    )
}

fn cameras() -> TableSpec {
    TableSpec::new(
        "cameras",
        vec![
            ColumnSpec::id("id"),
            ColumnSpec::new("camera_id", Varchar(100)).not_null().unique(),
            ColumnSpec::new("property_id", Integer).references("properties", "id", OnDelete::Cascade),
            ColumnSpec::new("name", Varchar(255)).not_null(),
            ColumnSpec::new("rtsp_url", Text),
            ColumnSpec::new("location", Text),
            ColumnSpec::new("monitor_id", Varchar(50)),
            ColumnSpec::new("status", Varchar(20))
                .not_null()
                .default(DefaultValue::Text("online"))
                .one_of(CAMERA_STATUSES),
            ColumnSpec::timestamp("created_at"),
        ],
    )
}

fn schedules() -> TableSpec {
    TableSpec::new(
        "schedules",
        vec![
            ColumnSpec::id("id"),
            ColumnSpec::new("guard_id", Integer)
                .not_null()
                .references("guards", "id", OnDelete::Cascade),
            ColumnSpec::new("property_id", Integer)
                .not_null()
                .references("properties", "id", OnDelete::Cascade),
            ColumnSpec::new("shift_start", Timestamptz).not_null(),
            ColumnSpec::new("shift_end", Timestamptz).not_null(),
            ColumnSpec::new("status", Varchar(20))
                .not_null()
                .default(DefaultValue::Text("scheduled"))
                .one_of(SCHEDULE_STATUSES),
            ColumnSpec::timestamp("created_at"),
        ],
    )
    .check("shift_end > shift_start")
}

fn reports() -> TableSpec {
    TableSpec::new(
        "reports",
        vec![
            ColumnSpec::id("id"),
            ColumnSpec::new("guard_id", Integer).references("guards", "id", OnDelete::SetNull),
            ColumnSpec::new("property_id", Integer)
                .not_null()
                .references("properties", "id", OnDelete::Cascade),
            ColumnSpec::new("title", Varchar(255)).not_null(),
            ColumnSpec::new("body", Text),
            ColumnSpec::new("severity", Varchar(20))
                .not_null()
                .default(DefaultValue::Text("low"))
                .one_of(SEVERITIES),
            ColumnSpec::new("submitted_at", Timestamptz),
            ColumnSpec::timestamp("created_at"),
        ],
    )
}

fn ai_alerts_log() -> TableSpec {
    TableSpec::new(
        "ai_alerts_log",
        vec![
            ColumnSpec::id("id"),
            ColumnSpec::new("camera_id", Varchar(100)).references("cameras", "camera_id", OnDelete::SetNull),
            ColumnSpec::new("alert_type", Varchar(50)).not_null(),
            ColumnSpec::new("priority", Varchar(20))
                .not_null()
                .default(DefaultValue::Text("medium"))
                .one_of(SEVERITIES),
            ColumnSpec::new("description", Text),
            ColumnSpec::new("detection_data", Jsonb)
                .not_null()
                .default(DefaultValue::Json("{}")),
            ColumnSpec::new("status", Varchar(20))
                .not_null()
                .default(DefaultValue::Text("pending"))
                .one_of(ALERT_STATUSES),
            ColumnSpec::new("acknowledged_by", Integer).references("users", "id", OnDelete::SetNull),
            ColumnSpec::new("acknowledged_at", Timestamptz),
            ColumnSpec::timestamp("created_at"),
        ],
    )
}

fn security_events() -> TableSpec {
    TableSpec::new(
        "security_events",
        vec![
            ColumnSpec::id("id"),
            ColumnSpec::new("property_id", Integer).references("properties", "id", OnDelete::Cascade),
            ColumnSpec::new("event_type", Varchar(50)).not_null(),
            ColumnSpec::new("severity", Varchar(20))
                .not_null()
                .default(DefaultValue::Text("low"))
                .one_of(SEVERITIES),
            ColumnSpec::new("description", Text),
            ColumnSpec::new("metadata", Jsonb)
                .not_null()
                .default(DefaultValue::Json("{}")),
            ColumnSpec::timestamp("occurred_at"),
        ],
    )
}

fn monitor_relationships() -> TableSpec {
    TableSpec::new(
        "monitor_relationships",
        vec![
            ColumnSpec::id("id"),
            ColumnSpec::new("monitor_a", Varchar(50)).not_null(),
            ColumnSpec::new("monitor_b", Varchar(50)).not_null(),
            ColumnSpec::new("spatial_relationship", Varchar(20))
                .not_null()
                .default(DefaultValue::Text("adjacent"))
                .one_of(SpatialRelationship::VALUES),
            ColumnSpec::new("average_handoff_ms", Integer)
                .not_null()
                .default(DefaultValue::Int(2000))
                .check("average_handoff_ms >= 0"),
            ColumnSpec::new("confidence_multiplier", Real)
                .not_null()
                .default(DefaultValue::Float(1.2))
                .check("confidence_multiplier > 0"),
            ColumnSpec::new("transition_zones", Jsonb)
                .not_null()
                .default(DefaultValue::Json("[]")),
            ColumnSpec::timestamp("created_at"),
            ColumnSpec::timestamp("updated_at"),
        ],
    )
    .unique(&["monitor_a", "monitor_b"])
    .check("monitor_a <> monitor_b")
}

fn cross_monitor_threats() -> TableSpec {
    TableSpec::new(
        "cross_monitor_threats",
        vec![
            ColumnSpec::id("id"),
            ColumnSpec::new("threat_id", Varchar(100)).not_null().unique(),
            ColumnSpec::new("monitor_id", Varchar(50)).not_null(),
            ColumnSpec::new("zone_id", Varchar(50)),
            ColumnSpec::new("threat_type", Varchar(50)).not_null(),
            ColumnSpec::new("threat_level", Varchar(20)).not_null().one_of(THREAT_LEVELS),
            ColumnSpec::new("confidence", Real)
                .not_null()
                .check("confidence >= 0 AND confidence <= 1"),
            ColumnSpec::new("bbox_x", Integer).not_null(),
            ColumnSpec::new("bbox_y", Integer).not_null(),
            ColumnSpec::new("bbox_width", Integer).not_null().check("bbox_width >= 0"),
            ColumnSpec::new("bbox_height", Integer).not_null().check("bbox_height >= 0"),
            ColumnSpec::new("movement_dx", Real),
            ColumnSpec::new("movement_dy", Real),
            ColumnSpec::new("features", Jsonb)
                .not_null()
                .default(DefaultValue::Json("{}")),
            ColumnSpec::timestamp("first_seen"),
            ColumnSpec::timestamp("last_seen"),
        ],
    )
}

fn threat_correlations() -> TableSpec {
    TableSpec::new(
        "threat_correlations",
        vec![
            ColumnSpec::id("id"),
            ColumnSpec::new("correlation_id", Varchar(100)).not_null().unique(),
            ColumnSpec::new("primary_threat_id", Varchar(100))
                .not_null()
                .references("cross_monitor_threats", "threat_id", OnDelete::Cascade),
            ColumnSpec::new("correlated_threat_ids", TextArray)
                .not_null()
                .default(DefaultValue::EmptyArray),
            ColumnSpec::new("confidence_score", Real)
                .not_null()
                .check("confidence_score >= 0 AND confidence_score <= 1"),
            ColumnSpec::new("status", Varchar(30))
                .not_null()
                .default(DefaultValue::Text("pending"))
                .one_of(CorrelationStatus::VALUES),
            ColumnSpec::new("correlation_factors", Jsonb)
                .not_null()
                .default(DefaultValue::Json("{}")),
            ColumnSpec::new("handoff_count", Integer)
                .not_null()
                .default(DefaultValue::Int(0)),
            ColumnSpec::new("last_handoff_at", Timestamptz),
            ColumnSpec::timestamp("created_at"),
            ColumnSpec::timestamp("updated_at"),
            ColumnSpec::new("expires_at", Timestamptz)
                .not_null()
                .default(DefaultValue::Expr("NOW() + INTERVAL '5 minutes'")),
        ],
    )
}

fn threat_handoff_log() -> TableSpec {
    TableSpec::new(
        "threat_handoff_log",
        vec![
            ColumnSpec::id("id"),
            ColumnSpec::new("correlation_id", Varchar(100))
                .not_null()
                .references("threat_correlations", "correlation_id", OnDelete::Cascade),
            ColumnSpec::new("threat_id", Varchar(100))
                .not_null()
                .references("cross_monitor_threats", "threat_id", OnDelete::Cascade),
            ColumnSpec::new("from_monitor", Varchar(50)).not_null(),
            ColumnSpec::new("to_monitor", Varchar(50)).not_null(),
            ColumnSpec::new("status", Varchar(20))
                .not_null()
                .default(DefaultValue::Text("initiated"))
                .one_of(HandoffStatus::VALUES),
            ColumnSpec::new("latency_ms", Integer).check("latency_ms >= 0"),
            ColumnSpec::new("error_message", Text),
            ColumnSpec::timestamp("initiated_at"),
            ColumnSpec::new("completed_at", Timestamptz),
        ],
    )
}

fn indexes() -> Vec<IndexSpec> {
    vec![
        IndexSpec::new("idx_users_role", "users", &["role"]),
        IndexSpec::new("idx_properties_client", "properties", &["client_id"]),
        IndexSpec::new("idx_cameras_property", "cameras", &["property_id"]),
        IndexSpec::new("idx_schedules_guard_start", "schedules", &["guard_id", "shift_start"]),
        IndexSpec::new("idx_schedules_property", "schedules", &["property_id"]),
        IndexSpec::new("idx_reports_property", "reports", &["property_id"]),
        IndexSpec::new("idx_ai_alerts_camera", "ai_alerts_log", &["camera_id"]),
        IndexSpec::new("idx_ai_alerts_created", "ai_alerts_log", &["created_at DESC"]),
        IndexSpec::new("idx_ai_alerts_open", "ai_alerts_log", &["priority", "created_at"])
            .partial("status = 'pending'"),
        IndexSpec::new("idx_security_events_property", "security_events", &["property_id", "occurred_at"]),
        IndexSpec::new(
            "idx_monitor_relationships_pair",
            "monitor_relationships",
            &["LEAST(monitor_a, monitor_b)", "GREATEST(monitor_a, monitor_b)"],
        )
        .unique(),
        IndexSpec::new("idx_cross_monitor_threats_monitor", "cross_monitor_threats", &["monitor_id", "zone_id"]),
        IndexSpec::new("idx_cross_monitor_threats_last_seen", "cross_monitor_threats", &["last_seen"]),
        IndexSpec::new("idx_threat_correlations_primary", "threat_correlations", &["primary_threat_id"]),
        IndexSpec::new("idx_threat_correlations_expiry", "threat_correlations", &["expires_at"])
            .partial("status IN ('pending', 'active', 'handoff_in_progress')"),
        IndexSpec::new("idx_threat_handoff_log_correlation", "threat_handoff_log", &["correlation_id"]),
        IndexSpec::new("idx_threat_handoff_log_threat", "threat_handoff_log", &["threat_id"]),
        IndexSpec::new("idx_threat_handoff_log_monitors", "threat_handoff_log", &["from_monitor", "to_monitor"]),
    ]
}

/// Default expected handoff latency for seeded monitor pairs.
pub const DEFAULT_HANDOFF_MS: i64 = 2000;

fn relationship(a: &str, b: &str, kind: SpatialRelationship, multiplier: f64) -> SeedRow {
    SeedRow::new("monitor_relationships", format!("{} <-> {} ({})", a, b, kind))
        .set("monitor_a", a)
        .set("monitor_b", b)
        .set("spatial_relationship", kind.as_str())
        .set("average_handoff_ms", DEFAULT_HANDOFF_MS)
        .set("confidence_multiplier", multiplier)
        .set("transition_zones", SeedValue::Json(json!([])))
}

fn seeds() -> Vec<SeedRow> {
    vec![
        SeedRow::new("users", "admin@apex-ai.local")
            .set("first_name", "System")
            .set("last_name", "Administrator")
            .set("email", "admin@apex-ai.local")
            // Locked until an operator sets a real password.
            .set("password_hash", "!")
            .set("role", "admin"),
        SeedRow::new("clients", "demo-client@apex-ai.local")
            .set("name", "Demo Client")
            .set("email", "demo-client@apex-ai.local")
            .set("contact_person", "Demo Contact"),
        relationship("0", "1", SpatialRelationship::Adjacent, 1.3),
        relationship("1", "2", SpatialRelationship::Sequential, 1.2),
        relationship("0", "2", SpatialRelationship::Overlapping, 1.4),
        relationship("2", "3", SpatialRelationship::Adjacent, 1.25),
    ]
}
