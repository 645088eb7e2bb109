//! Schema module - declarative table/index/trigger specs, the DDL emitter and
//! the canonical APEX catalog
pub mod catalog;
pub mod ddl;
pub mod entities;
pub mod model;

pub use catalog::{apex_catalog, Catalog, OrderViolation};
pub use ddl::TriggerDdl;
pub use entities::{
    CorrelationStatus, CrossMonitorThreat, HandoffStatus, MonitorRelationship, SpatialRelationship,
    ThreatCorrelation, ThreatHandoffLog,
};
pub use model::*;
