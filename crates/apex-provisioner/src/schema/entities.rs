//! Row types for the multi-monitor correlation tables

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];
            pub const VALUES: &'static [&'static str] = &[$($text),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($text => Ok($name::$variant),)+
                    other => Err(ParseEnumError { kind: $kind, value: other.to_string() }),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = ParseEnumError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpatialRelationship {
    Adjacent,
    Overlapping,
    Sequential,
    Isolated,
}

string_enum!(SpatialRelationship, "spatial relationship", {
    Adjacent => "adjacent",
    Overlapping => "overlapping",
    Sequential => "sequential",
    Isolated => "isolated",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationStatus {
    Pending,
    Active,
    HandoffInProgress,
    Completed,
    Expired,
    Failed,
}

string_enum!(CorrelationStatus, "correlation status", {
    Pending => "pending",
    Active => "active",
    HandoffInProgress => "handoff_in_progress",
    Completed => "completed",
    Expired => "expired",
    Failed => "failed",
});

impl CorrelationStatus {
    /// Ordered stages; states sharing a stage are peers, the last stage is terminal.
    pub fn stages() -> Vec<Vec<&'static str>> {
        vec![
            vec![Self::Pending.as_str()],
            vec![Self::Active.as_str()],
            vec![Self::HandoffInProgress.as_str()],
            vec![
                Self::Completed.as_str(),
                Self::Expired.as_str(),
                Self::Failed.as_str(),
            ],
        ]
    }

    pub fn rank(&self) -> usize {
        match self {
            Self::Pending => 0,
            Self::Active => 1,
            Self::HandoffInProgress => 2,
            Self::Completed | Self::Expired | Self::Failed => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 3
    }

    /// Staying put is always allowed; otherwise only forward, and never out
    /// of a terminal state.
    pub fn can_advance_to(&self, next: CorrelationStatus) -> bool {
        if *self == next {
            return true;
        }
        !self.is_terminal() && next.rank() >= self.rank()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffStatus {
    Initiated,
    InProgress,
    Successful,
    Failed,
    Timeout,
}

string_enum!(HandoffStatus, "handoff status", {
    Initiated => "initiated",
    InProgress => "in_progress",
    Successful => "successful",
    Failed => "failed",
    Timeout => "timeout",
});

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MonitorRelationship {
    pub id: i32,
    pub monitor_a: String,
    pub monitor_b: String,
    #[sqlx(try_from = "String")]
    pub spatial_relationship: SpatialRelationship,
    pub average_handoff_ms: i32,
    pub confidence_multiplier: f32,
    pub transition_zones: Value,
    pub created_at: DateTime<Utc>,
}

impl MonitorRelationship {
    pub const SELECT: &'static str = "SELECT id, monitor_a, monitor_b, spatial_relationship, \
        average_handoff_ms, confidence_multiplier, transition_zones, created_at \
        FROM monitor_relationships ORDER BY id";

    /// True when the row covers the given pair in either direction.
    pub fn links(&self, a: &str, b: &str) -> bool {
        (self.monitor_a == a && self.monitor_b == b) || (self.monitor_a == b && self.monitor_b == a)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CrossMonitorThreat {
    pub id: i32,
    pub threat_id: String,
    pub monitor_id: String,
    pub zone_id: Option<String>,
    pub threat_type: String,
    pub threat_level: String,
    pub confidence: f32,
    pub bbox_x: i32,
    pub bbox_y: i32,
    pub bbox_width: i32,
    pub bbox_height: i32,
    pub movement_dx: Option<f32>,
    pub movement_dy: Option<f32>,
    pub last_seen: DateTime<Utc>,
}

impl CrossMonitorThreat {
    pub const SELECT: &'static str = "SELECT id, threat_id, monitor_id, zone_id, threat_type, threat_level, \
        confidence, bbox_x, bbox_y, bbox_width, bbox_height, movement_dx, movement_dy, last_seen \
        FROM cross_monitor_threats ORDER BY id";
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ThreatCorrelation {
    pub id: i32,
    pub correlation_id: String,
    pub primary_threat_id: String,
    pub correlated_threat_ids: Vec<String>,
    pub confidence_score: f32,
    #[sqlx(try_from = "String")]
    pub status: CorrelationStatus,
    pub handoff_count: i32,
    pub last_handoff_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

impl ThreatCorrelation {
    pub const SELECT: &'static str = "SELECT id, correlation_id, primary_threat_id, correlated_threat_ids, \
        confidence_score, status, handoff_count, last_handoff_at, expires_at \
        FROM threat_correlations ORDER BY id";

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ThreatHandoffLog {
    pub id: i32,
    pub correlation_id: String,
    pub threat_id: String,
    pub from_monitor: String,
    pub to_monitor: String,
    #[sqlx(try_from = "String")]
    pub status: HandoffStatus,
    pub latency_ms: Option<i32>,
    pub initiated_at: DateTime<Utc>,
}

impl ThreatHandoffLog {
    pub const SELECT: &'static str = "SELECT id, correlation_id, threat_id, from_monitor, to_monitor, status, \
        latency_ms, initiated_at FROM threat_handoff_log ORDER BY id";
}
