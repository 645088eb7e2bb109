// apex-provisioner/src/main.rs

#[cfg(feature = "cli")]
mod cli {
    use std::path::PathBuf;
    use std::process::ExitCode;
    use std::time::Instant;

    use anyhow::Context;
    use apex_provisioner::provision::health;
    use apex_provisioner::{apex_catalog, db, report, telemetry, Config, ProvisionMetrics, ProvisionReport, Provisioner};
    use clap::{Parser, Subcommand};
    use tracing::{error, info, warn};

    #[derive(Parser, Debug)]
    #[command(name = "apex-provisioner", version, about = "Provision and verify the APEX AI PostgreSQL schema")]
    struct Cli {
        #[command(subcommand)]
        command: Option<Command>,

        /// Write outcome counters in Prometheus text format to this file
        #[arg(long, global = true)]
        metrics_file: Option<PathBuf>,
    }

    #[derive(Subcommand, Debug, Clone, Copy)]
    enum Command {
        /// Create tables, indexes, triggers, grants and seed data, then verify (default)
        Provision,
        /// Compare seeded row counts against the expected minimums
        Verify,
        /// Grant the application role access to every table
        Grant,
        /// Report server version and which catalog tables exist
        Check,
        /// Print the statements a provisioning run would issue
        Plan,
    }

    pub async fn main() -> anyhow::Result<ExitCode> {
        let cli = Cli::parse();
        telemetry::init_tracing();

        let cfg = Config::from_env().context("loading configuration")?;
        cfg.print_config();

        let catalog = if cfg.seed_data {
            apex_catalog()
        } else {
            apex_catalog().without_seeds()
        };

        let command = cli.command.unwrap_or(Command::Provision);
        if let Command::Plan = command {
            catalog.check_order()?;
            println!("{}", report::render_plan(&catalog, &cfg.schema));
            return Ok(ExitCode::SUCCESS);
        }

        let started = Instant::now();
        let pool = match db::connect(&cfg).await {
            Ok(pool) => pool,
            Err(e) => {
                error!("{}", e);
                return Ok(ExitCode::FAILURE);
            }
        };

        if let Command::Check = command {
            let mut conn = pool.acquire().await.context("acquiring connection")?;
            let health = health::check(&mut conn, &cfg.schema, &catalog.table_names()).await?;
            println!("{}", report::render_health(&health));
            for table in health.missing() {
                warn!("Table {} is missing from schema {}", table, cfg.schema);
            }
            drop(conn);
            pool.close().await;
            return Ok(ExitCode::SUCCESS);
        }

        let provisioner = Provisioner::new(cfg, catalog, pool.clone());
        let result = match command {
            Command::Verify => provisioner.verify().await,
            Command::Grant => provisioner.grant().await,
            _ => provisioner.run().await,
        };
        pool.close().await;

        let run: ProvisionReport = match result {
            Ok(run) => run,
            Err(e) => {
                error!("{}", e);
                return Ok(ExitCode::FAILURE);
            }
        };

        println!("{}", report::render_report(&run));

        if let Some(path) = &cli.metrics_file {
            let metrics = ProvisionMetrics::new()?;
            metrics.observe(&run);
            metrics.set_duration(started.elapsed().as_secs_f64());
            std::fs::write(path, metrics.render()?)
                .with_context(|| format!("writing metrics to {}", path.display()))?;
            info!("Metrics written to {}", path.display());
        }

        Ok(if run.succeeded() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        })
    }
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<std::process::ExitCode> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
