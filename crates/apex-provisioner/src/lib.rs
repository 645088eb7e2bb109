// apex-provisioner/src/lib.rs

pub mod config;
pub mod db;
pub mod error;
pub mod metrics;
pub mod provision;
pub mod report;
pub mod schema;
pub mod telemetry;

// Public API exports
pub use config::Config;
pub use error::ProvisionError;
pub use metrics::ProvisionMetrics;
pub use provision::{ObjectKind, ObjectOutcome, ProvisionReport, Provisioner};
pub use schema::{apex_catalog, Catalog};
