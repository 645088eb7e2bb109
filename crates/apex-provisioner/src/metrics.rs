
use prometheus::{Encoder, Gauge, IntCounter, IntCounterVec, Registry, TextEncoder};

use crate::provision::{ObjectKind, ProvisionReport};

/// Outcome counters for one run, on a registry owned by the run.
pub struct ProvisionMetrics {
    registry: Registry,
    objects: IntCounterVec,
    warnings: IntCounter,
    duration: Gauge,
}

impl ProvisionMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let objects = IntCounterVec::new(
            prometheus::opts!("apex_provision_objects_total", "Provisioned objects by kind and outcome"),
            &["kind", "outcome"],
        )?;
        let warnings = IntCounter::new("apex_provision_warnings_total", "Verification and ordering warnings")?;
        let duration = Gauge::new("apex_provision_duration_seconds", "Wall time of the last run")?;

        registry.register(Box::new(objects.clone()))?;
        registry.register(Box::new(warnings.clone()))?;
        registry.register(Box::new(duration.clone()))?;

        Ok(Self {
            registry,
            objects,
            warnings,
            duration,
        })
    }

    pub fn observe(&self, report: &ProvisionReport) {
        // Touch every kind so absent kinds still export an explicit zero.
        for kind in ObjectKind::ALL {
            for outcome in ["created", "already_existed", "failed"] {
                self.objects.with_label_values(&[kind.as_str(), outcome]);
            }
        }
        for entry in &report.objects {
            self.objects
                .with_label_values(&[entry.kind.as_str(), entry.outcome.label()])
                .inc();
        }
        self.warnings.inc_by(report.warnings.len() as u64);
    }

    pub fn set_duration(&self, seconds: f64) {
        self.duration.set(seconds);
    }

    pub fn render(&self) -> prometheus::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = vec![];
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
