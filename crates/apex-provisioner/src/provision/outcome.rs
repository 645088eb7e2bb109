//! Per-object results and the run report

use std::fmt;
use tracing::{error, info, warn};

use super::remediation::RemediationOutcome;
use super::verify::CountCheck;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Schema,
    Table,
    Index,
    Function,
    Trigger,
    Grant,
    Seed,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 7] = [
        ObjectKind::Schema,
        ObjectKind::Table,
        ObjectKind::Index,
        ObjectKind::Function,
        ObjectKind::Trigger,
        ObjectKind::Grant,
        ObjectKind::Seed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Schema => "schema",
            ObjectKind::Table => "table",
            ObjectKind::Index => "index",
            ObjectKind::Function => "function",
            ObjectKind::Trigger => "trigger",
            ObjectKind::Grant => "grant",
            ObjectKind::Seed => "seed",
        }
    }

    fn created_verb(&self) -> &'static str {
        match self {
            ObjectKind::Grant => "granted",
            ObjectKind::Seed => "inserted",
            ObjectKind::Function => "installed",
            _ => "created",
        }
    }

    fn existed_verb(&self) -> &'static str {
        match self {
            ObjectKind::Grant => "not needed",
            ObjectKind::Seed => "already present",
            ObjectKind::Function => "updated in place",
            _ => "already exists",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tri-state result for one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectOutcome {
    Created,
    AlreadyExisted,
    Failed(String),
}

impl ObjectOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ObjectOutcome::Created => "created",
            ObjectOutcome::AlreadyExisted => "already_existed",
            ObjectOutcome::Failed(_) => "failed",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ObjectOutcome::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectReport {
    pub kind: ObjectKind,
    pub name: String,
    pub outcome: ObjectOutcome,
}

impl ObjectReport {
    pub fn describe(&self) -> String {
        match &self.outcome {
            ObjectOutcome::Created => format!("{} {} {}", self.kind, self.name, self.kind.created_verb()),
            ObjectOutcome::AlreadyExisted => {
                format!("{} {} {}", self.kind, self.name, self.kind.existed_verb())
            }
            ObjectOutcome::Failed(reason) => format!("{} {} failed: {}", self.kind, self.name, reason),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ProvisionReport {
    pub objects: Vec<ObjectReport>,
    pub count_checks: Vec<CountCheck>,
    pub warnings: Vec<String>,
    pub remediation: Vec<(String, RemediationOutcome)>,
}

impl ProvisionReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an outcome and logs it at a level matching its severity.
    pub fn record(&mut self, kind: ObjectKind, name: impl Into<String>, outcome: ObjectOutcome) {
        let entry = ObjectReport {
            kind,
            name: name.into(),
            outcome,
        };
        match &entry.outcome {
            ObjectOutcome::Failed(_) => error!(kind = %entry.kind, object = %entry.name, "{}", entry.describe()),
            _ => info!(kind = %entry.kind, object = %entry.name, "{}", entry.describe()),
        }
        self.objects.push(entry);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.warnings.push(message);
    }

    /// Replaces the outcome of an already recorded object.
    pub fn resolve(&mut self, kind: ObjectKind, name: &str, outcome: ObjectOutcome) -> bool {
        match self
            .objects
            .iter_mut()
            .find(|o| o.kind == kind && o.name == name)
        {
            Some(entry) => {
                entry.outcome = outcome;
                true
            }
            None => false,
        }
    }

    /// The run succeeds when nothing failed; objects that already existed
    /// count as success.
    pub fn succeeded(&self) -> bool {
        !self.objects.iter().any(|o| o.outcome.is_failed())
    }

    pub fn failures(&self) -> impl Iterator<Item = &ObjectReport> {
        self.objects.iter().filter(|o| o.outcome.is_failed())
    }

    pub fn count(&self, kind: ObjectKind, label: &str) -> usize {
        self.objects
            .iter()
            .filter(|o| o.kind == kind && o.outcome.label() == label)
            .count()
    }

    pub fn outcome_of(&self, kind: ObjectKind, name: &str) -> Option<&ObjectOutcome> {
        self.objects
            .iter()
            .find(|o| o.kind == kind && o.name == name)
            .map(|o| &o.outcome)
    }

    /// Manual steps an operator still has to run, if the remediation chain
    /// ended with instructions.
    pub fn manual_instructions(&self) -> Option<&[String]> {
        self.remediation.iter().rev().find_map(|(_, outcome)| match outcome {
            RemediationOutcome::Manual(steps) => Some(steps.as_slice()),
            _ => None,
        })
    }

    pub fn merge(&mut self, other: ProvisionReport) {
        self.objects.extend(other.objects);
        self.count_checks.extend(other.count_checks);
        self.warnings.extend(other.warnings);
        self.remediation.extend(other.remediation);
    }
}

/// How a failed statement should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The object is already there, possibly created by a concurrent run.
    Duplicate,
    PermissionDenied,
    /// A referenced relation or role does not exist.
    MissingDependency,
    Other,
}

/// Classifies by SQLSTATE. A unique violation only counts as a duplicate when
/// it comes from a system catalog index, which is how two concurrent
/// `CREATE ... IF NOT EXISTS` calls collide.
pub fn classify_sqlstate(code: Option<&str>, constraint: Option<&str>) -> ErrorClass {
    match code {
        Some("42P07") | Some("42710") | Some("42P06") | Some("42723") => ErrorClass::Duplicate,
        Some("23505") if constraint.is_some_and(|c| c.starts_with("pg_")) => ErrorClass::Duplicate,
        Some("42501") => ErrorClass::PermissionDenied,
        Some("42P01") | Some("42704") | Some("3F000") | Some("42883") => ErrorClass::MissingDependency,
        _ => ErrorClass::Other,
    }
}

pub fn classify_error(err: &sqlx::Error) -> ErrorClass {
    match err {
        sqlx::Error::Database(db) => classify_sqlstate(db.code().as_deref(), db.constraint()),
        _ => ErrorClass::Other,
    }
}

/// Maps a statement error to an outcome; duplicates become `AlreadyExisted`.
pub fn outcome_from_error(err: &sqlx::Error) -> ObjectOutcome {
    match classify_error(err) {
        ErrorClass::Duplicate => ObjectOutcome::AlreadyExisted,
        _ => ObjectOutcome::Failed(error_reason(err)),
    }
}

pub fn error_reason(err: &sqlx::Error) -> String {
    match err {
        sqlx::Error::Database(db) => match db.code() {
            Some(code) => format!("{} (SQLSTATE {})", db.message(), code),
            None => db.message().to_string(),
        },
        other => other.to_string(),
    }
}
