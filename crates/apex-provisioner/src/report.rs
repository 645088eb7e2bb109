//! Console rendering for run reports, health checks and plans.

use colored::Colorize;

use crate::provision::{CountStatus, HealthReport, ObjectKind, ObjectOutcome, ObjectReport, ProvisionReport, RemediationOutcome};
use crate::schema::{ddl, Catalog};

fn heading(kind: ObjectKind) -> &'static str {
    match kind {
        ObjectKind::Schema => "SCHEMA",
        ObjectKind::Table => "TABLES",
        ObjectKind::Index => "INDEXES",
        ObjectKind::Function => "FUNCTIONS",
        ObjectKind::Trigger => "TRIGGERS",
        ObjectKind::Grant => "GRANTS",
        ObjectKind::Seed => "SEED DATA",
    }
}

fn status_line(entry: &ObjectReport) -> String {
    let tag = match &entry.outcome {
        ObjectOutcome::Created => "  OK  ".green().bold(),
        ObjectOutcome::AlreadyExisted => " SKIP ".cyan(),
        ObjectOutcome::Failed(_) => " FAIL ".red().bold(),
    };
    format!("[{}] {}", tag, entry.describe())
}

pub fn render_report(report: &ProvisionReport) -> String {
    let mut out = Vec::new();

    for kind in ObjectKind::ALL {
        let entries: Vec<&ObjectReport> = report.objects.iter().filter(|o| o.kind == kind).collect();
        if entries.is_empty() {
            continue;
        }
        out.push(format!("{}", heading(kind).bold()));
        out.extend(entries.into_iter().map(status_line));
    }

    if !report.count_checks.is_empty() {
        out.push(format!("{}", "ROW COUNTS".bold()));
        for check in &report.count_checks {
            let actual = check.actual.map(|n| n.to_string()).unwrap_or_else(|| "?".into());
            let line = format!("  {:<24} {:>6} (min {})", check.table, actual, check.expected_min);
            out.push(match check.status {
                CountStatus::Ok => line,
                _ => format!("{}", line.yellow()),
            });
        }
    }

    for (strategy, outcome) in &report.remediation {
        let line = match outcome {
            RemediationOutcome::Resolved => format!("remediation {}: {}", strategy, "resolved".green()),
            RemediationOutcome::NotApplicable(why) => format!("remediation {}: skipped ({})", strategy, why),
            RemediationOutcome::Failed(why) => format!("remediation {}: {} ({})", strategy, "failed".red(), why),
            RemediationOutcome::Manual(_) => format!("remediation {}: {}", strategy, "manual steps required".yellow()),
        };
        out.push(line);
    }
    if let Some(steps) = report.manual_instructions() {
        out.extend(steps.iter().map(|s| format!("    {}", s)));
    }

    for warning in &report.warnings {
        out.push(format!("{} {}", "warning:".yellow().bold(), warning));
    }

    let failed = report.failures().count();
    let summary = format!(
        "{} created, {} already existed, {} failed, {} warning(s)",
        report.objects.iter().filter(|o| o.outcome == ObjectOutcome::Created).count(),
        report.objects.iter().filter(|o| o.outcome == ObjectOutcome::AlreadyExisted).count(),
        failed,
        report.warnings.len()
    );
    out.push(if failed == 0 {
        format!("{}", summary.green().bold())
    } else {
        format!("{}", summary.red().bold())
    });

    out.join("\n")
}

pub fn render_health(health: &HealthReport) -> String {
    let mut out = vec![
        format!("PostgreSQL {}", health.server_version.bright_cyan()),
        format!("Schema: {}", health.schema),
    ];
    for table in &health.tables {
        if table.present {
            out.push(format!("  {} {}", "present".green(), table.table));
        } else {
            out.push(format!("  {} {}", "missing".yellow(), table.table));
        }
    }
    out.join("\n")
}

/// Every statement a provisioning run would issue against an empty schema,
/// ending with `;`.
pub fn render_plan(catalog: &Catalog, schema: &str) -> String {
    let mut statements = vec![ddl::create_schema(schema)];
    statements.extend(catalog.tables.iter().map(ddl::create_table));
    statements.extend(catalog.indexes.iter().map(ddl::create_index));
    for trigger in catalog.triggers() {
        statements.push(trigger.function_sql);
        statements.push(trigger.trigger_sql);
    }
    statements.extend(catalog.seeds.iter().map(|seed| {
        let values: Vec<String> = seed.values.iter().map(|(c, v)| format!("{} = {:?}", c, v)).collect();
        format!("-- {}\n{}", values.join(", "), ddl::insert_seed(seed))
    }));
    statements
        .into_iter()
        .map(|s| format!("{};", s))
        .collect::<Vec<_>>()
        .join("\n\n")
}
