// apex-provisioner/src/telemetry.rs

use tracing_subscriber::{fmt, EnvFilter};

/// Used when `RUST_LOG` is unset or unparsable. Per-statement sqlx logging
/// stays quiet unless asked for.
pub const DEFAULT_FILTER: &str = "info,sqlx=warn";

fn env_filter(raw: Option<&str>) -> EnvFilter {
    raw.and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs the global subscriber. Logs go to stderr so stdout carries only
/// the report and `plan` SQL.
pub fn init_tracing() {
    let raw = std::env::var("RUST_LOG").ok();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter(raw.as_deref()))
        .with_writer(std::io::stderr)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_target(true)
        .with_level(true)
        .compact()
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_filter_uses_default() {
        assert_eq!(env_filter(None).to_string(), EnvFilter::new(DEFAULT_FILTER).to_string());
    }

    #[test]
    fn test_rust_log_overrides_default() {
        let filter = env_filter(Some("debug,sqlx=info")).to_string();
        assert!(filter.contains("sqlx=info"));
        assert!(!filter.contains("sqlx=warn"));
    }
}
