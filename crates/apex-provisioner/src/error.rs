//! Typed errors for the few conditions that abort a run outright.
//!
//! Everything else (a single table failing, a grant being refused) is recorded
//! as an [`ObjectOutcome`](crate::provision::ObjectOutcome) and the run carries on.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("could not connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid catalog: {0}")]
    Catalog(String),
}

pub type Result<T> = std::result::Result<T, ProvisionError>;
