//! Provisioning module - the run itself, grants with remediation fallbacks,
//! verification and the health check
pub mod grants;
pub mod health;
pub mod outcome;
pub mod provisioner;
pub mod remediation;
pub mod verify;

pub use health::{HealthReport, TablePresence};
pub use outcome::{
    classify_error, classify_sqlstate, ErrorClass, ObjectKind, ObjectOutcome, ObjectReport, ProvisionReport,
};
pub use provisioner::Provisioner;
pub use remediation::{RemediationContext, RemediationOutcome, RemediationStrategy};
pub use verify::{CountCheck, CountStatus};

use crate::config::Config;
use crate::db;
use crate::schema::apex_catalog;

/// Connects with `cfg` and provisions the canonical catalog, honouring
/// `seed_data`.
pub async fn run(cfg: &Config) -> anyhow::Result<ProvisionReport> {
    let pool = db::connect(cfg).await?;
    let catalog = if cfg.seed_data {
        apex_catalog()
    } else {
        apex_catalog().without_seeds()
    };
    let report = Provisioner::new(cfg.clone(), catalog, pool.clone()).run().await?;
    pool.close().await;
    Ok(report)
}
