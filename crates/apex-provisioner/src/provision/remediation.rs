//! Ordered fallbacks for statements the operating role was not allowed to run.
//!
//! Each strategy reports a structured outcome; [`run_chain`] walks the list
//! until one resolves the problem or hands back manual instructions.

use async_trait::async_trait;
use sqlx::postgres::PgConnectOptions;
use sqlx::{ConnectOptions, Connection};
use tracing::{debug, info, warn};

use crate::config::Config;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemediationOutcome {
    Resolved,
    NotApplicable(String),
    Failed(String),
    /// Nothing more can be automated; these statements need a human.
    Manual(Vec<String>),
}

impl RemediationOutcome {
    /// Whether the chain should stop after this outcome.
    pub fn is_final(&self) -> bool {
        matches!(self, RemediationOutcome::Resolved | RemediationOutcome::Manual(_))
    }
}

pub struct RemediationContext<'a> {
    pub config: &'a Config,
    /// The role the denied statements actually ran as.
    pub current_user: &'a str,
    /// Statements that failed with `insufficient_privilege`.
    pub statements: Vec<String>,
}

#[async_trait]
pub trait RemediationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn attempt(&self, ctx: &RemediationContext<'_>) -> RemediationOutcome;
}

/// Runs strategies in order and returns every attempt, in order. The last
/// entry is the one that stopped the chain, or the final strategy tried.
pub async fn run_chain(
    strategies: &[Box<dyn RemediationStrategy>],
    ctx: &RemediationContext<'_>,
) -> Vec<(String, RemediationOutcome)> {
    let mut trail = Vec::with_capacity(strategies.len());
    for strategy in strategies {
        let outcome = strategy.attempt(ctx).await;
        match &outcome {
            RemediationOutcome::Resolved => info!("Remediation '{}' resolved the problem", strategy.name()),
            RemediationOutcome::NotApplicable(why) => info!("Remediation '{}' skipped: {}", strategy.name(), why),
            RemediationOutcome::Failed(why) => warn!("Remediation '{}' failed: {}", strategy.name(), why),
            RemediationOutcome::Manual(steps) => {
                warn!("Remediation '{}' needs {} manual step(s)", strategy.name(), steps.len())
            }
        }
        let stop = outcome.is_final();
        trail.push((strategy.name().to_string(), outcome));
        if stop {
            break;
        }
    }
    trail
}

pub fn default_chain() -> Vec<Box<dyn RemediationStrategy>> {
    vec![Box::new(AdminCredentials), Box::new(ManualInstructions)]
}

/// Re-runs the statements over a separate connection authenticated with the
/// configured admin credentials.
pub struct AdminCredentials;

impl AdminCredentials {
    async fn execute_all(options: PgConnectOptions, statements: &[String]) -> Result<(), String> {
        let mut conn = options
            .connect()
            .await
            .map_err(|e| format!("admin connection failed: {}", e))?;
        for sql in statements {
            sqlx::query(sql)
                .execute(&mut conn)
                .await
                .map_err(|e| format!("{}: {}", sql, e))?;
        }
        if let Err(e) = conn.close().await {
            debug!("admin connection did not close cleanly: {}", e);
        }
        Ok(())
    }
}

#[async_trait]
impl RemediationStrategy for AdminCredentials {
    fn name(&self) -> &'static str {
        "admin-credentials"
    }

    async fn attempt(&self, ctx: &RemediationContext<'_>) -> RemediationOutcome {
        let options = match ctx.config.admin_connect_options() {
            Ok(Some(options)) => options,
            Ok(None) => return RemediationOutcome::NotApplicable("DB_ADMIN_USER is not set".into()),
            Err(e) => return RemediationOutcome::Failed(e.to_string()),
        };
        if ctx.config.admin_user.as_deref() == Some(ctx.current_user) {
            return RemediationOutcome::NotApplicable("admin user is the operating user".into());
        }
        match Self::execute_all(options, &ctx.statements).await {
            Ok(()) => RemediationOutcome::Resolved,
            Err(e) => RemediationOutcome::Failed(e),
        }
    }
}

/// Always final: hands the exact statements back to the operator.
pub struct ManualInstructions;

#[async_trait]
impl RemediationStrategy for ManualInstructions {
    fn name(&self) -> &'static str {
        "manual-instructions"
    }

    async fn attempt(&self, ctx: &RemediationContext<'_>) -> RemediationOutcome {
        let mut steps = vec![format!(
            "Connect to {} as a superuser or the table owner and run:",
            ctx.config.target()
        )];
        steps.extend(ctx.statements.iter().map(|s| format!("{};", s)));
        RemediationOutcome::Manual(steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Fixed {
        name: &'static str,
        outcome: RemediationOutcome,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RemediationStrategy for Fixed {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn attempt(&self, _ctx: &RemediationContext<'_>) -> RemediationOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone()
        }
    }

    fn fixed(name: &'static str, outcome: RemediationOutcome, calls: &Arc<AtomicUsize>) -> Box<dyn RemediationStrategy> {
        Box::new(Fixed {
            name,
            outcome,
            calls: Arc::clone(calls),
        })
    }

    fn context(config: &Config) -> RemediationContext<'_> {
        RemediationContext {
            config,
            current_user: "postgres",
            statements: vec!["GRANT SELECT, INSERT, UPDATE, DELETE ON TABLE users TO \"apex_app\"".into()],
        }
    }

    #[test]
    fn test_chain_stops_at_first_resolution() {
        let config = Config::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = vec![
            fixed("skip", RemediationOutcome::NotApplicable("no".into()), &calls),
            fixed("fix", RemediationOutcome::Resolved, &calls),
            fixed("never", RemediationOutcome::Failed("unreachable".into()), &calls),
        ];

        let trail = tokio_test::block_on(run_chain(&chain, &context(&config)));

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[1], ("fix".to_string(), RemediationOutcome::Resolved));
    }

    #[test]
    fn test_chain_continues_past_failures() {
        let config = Config::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = vec![
            fixed("a", RemediationOutcome::Failed("boom".into()), &calls),
            fixed("b", RemediationOutcome::Failed("boom again".into()), &calls),
        ];

        let trail = tokio_test::block_on(run_chain(&chain, &context(&config)));
        assert_eq!(trail.len(), 2);
        assert!(trail.iter().all(|(_, o)| !o.is_final()));
    }

    #[tokio::test]
    async fn test_admin_strategy_not_applicable_without_admin_user() {
        let config = Config::default();
        let outcome = AdminCredentials.attempt(&context(&config)).await;
        assert!(matches!(outcome, RemediationOutcome::NotApplicable(_)));
    }

    #[tokio::test]
    async fn test_admin_strategy_skips_when_admin_is_operator() {
        let config = Config {
            admin_user: Some("postgres".into()),
            ..Config::default()
        };
        let outcome = AdminCredentials.attempt(&context(&config)).await;
        assert!(matches!(outcome, RemediationOutcome::NotApplicable(_)));
    }

    #[tokio::test]
    async fn test_admin_strategy_compares_against_connected_user() {
        // DATABASE_URL names the operating user; DB_USER keeps its default.
        let config = Config {
            database_url: Some("postgres://apex_app@127.0.0.1:1/apex".into()),
            admin_user: Some("postgres".into()),
            ..Config::default()
        };
        assert_eq!(config.db_user, "postgres");

        let ctx = RemediationContext {
            config: &config,
            current_user: "apex_app",
            statements: vec!["GRANT USAGE ON SCHEMA \"public\" TO \"apex_app\"".into()],
        };
        match AdminCredentials.attempt(&ctx).await {
            RemediationOutcome::Failed(why) => assert!(why.contains("admin connection failed"), "{}", why),
            other => panic!("expected an admin attempt, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_manual_instructions_list_statements() {
        let config = Config::default();
        let outcome = ManualInstructions.attempt(&context(&config)).await;
        match outcome {
            RemediationOutcome::Manual(steps) => {
                assert_eq!(steps.len(), 2);
                assert!(steps[0].contains("postgres://postgres@localhost:5432/apex"));
                assert!(steps[1].ends_with("TO \"apex_app\";"));
            }
            other => panic!("expected manual instructions, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_default_chain_without_admin_ends_in_manual_steps() {
        let config = Config::default();
        let trail = run_chain(&default_chain(), &context(&config)).await;
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[0].0, "admin-credentials");
        assert!(matches!(trail[1].1, RemediationOutcome::Manual(_)));
    }
}
