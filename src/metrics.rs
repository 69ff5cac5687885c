//! Reconciliation metrics
//!
//! Prometheus collectors shared by every controller. Registered once on the
//! process registry and served by the `/metrics` endpoint of the binary.

use crate::error::{Error, Result};
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::time::Duration;

/// Outcome label of a finished reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Requeue,
    Done,
    Skipped,
    /// Stored object could not be converted to its domain model
    Invalid,
    Error,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Requeue => "requeue",
            Outcome::Done => "done",
            Outcome::Skipped => "skipped",
            Outcome::Invalid => "invalid",
            Outcome::Error => "error",
        }
    }
}

/// Counters and latency histogram, labelled by resource kind
#[derive(Clone)]
pub struct ControllerMetrics {
    reconciles: IntCounterVec,
    errors: IntCounterVec,
    duration: HistogramVec,
}

impl ControllerMetrics {
    pub fn new() -> Result<Self> {
        let reconciles = IntCounterVec::new(
            Opts::new("delegator_reconcile_total", "Finished reconciles by outcome"),
            &["kind", "outcome"],
        )?;
        let errors = IntCounterVec::new(
            Opts::new(
                "delegator_reconcile_errors_total",
                "Reconciles that returned an error, by error class",
            ),
            &["kind", "error"],
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new(
                "delegator_reconcile_duration_seconds",
                "Time spent in a single reconcile",
            )
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["kind"],
        )?;

        Ok(Self {
            reconciles,
            errors,
            duration,
        })
    }

    /// Create the collectors and register them on `registry`
    pub fn register(registry: &Registry) -> Result<Self> {
        let metrics = Self::new()?;
        registry.register(Box::new(metrics.reconciles.clone()))?;
        registry.register(Box::new(metrics.errors.clone()))?;
        registry.register(Box::new(metrics.duration.clone()))?;
        Ok(metrics)
    }

    pub fn observe(&self, kind: &str, outcome: Outcome, elapsed: Duration) {
        self.reconciles
            .with_label_values(&[kind, outcome.as_str()])
            .inc();
        self.duration
            .with_label_values(&[kind])
            .observe(elapsed.as_secs_f64());
    }

    pub fn observe_error(&self, kind: &str, error: &Error, elapsed: Duration) {
        self.observe(kind, Outcome::Error, elapsed);
        self.errors
            .with_label_values(&[kind, error.metric_label()])
            .inc();
    }

    pub fn reconciles(&self, kind: &str, outcome: Outcome) -> u64 {
        self.reconciles
            .with_label_values(&[kind, outcome.as_str()])
            .get()
    }

    pub fn errors(&self, kind: &str, label: &str) -> u64 {
        self.errors.with_label_values(&[kind, label]).get()
    }
}

impl std::fmt::Debug for ControllerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerMetrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_observe() {
        let registry = Registry::new();
        let metrics = ControllerMetrics::register(&registry).unwrap();

        metrics.observe("BlockStorage", Outcome::Requeue, Duration::from_millis(3));
        metrics.observe_error(
            "BlockStorage",
            &Error::Unavailable("etcd down".into()),
            Duration::from_millis(7),
        );

        assert_eq!(metrics.reconciles("BlockStorage", Outcome::Requeue), 1);
        assert_eq!(metrics.reconciles("BlockStorage", Outcome::Error), 1);
        assert_eq!(metrics.errors("BlockStorage", "unavailable"), 1);
        assert_eq!(metrics.reconciles("Workspace", Outcome::Done), 0);

        let names: Vec<_> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"delegator_reconcile_total".to_string()));
        assert!(names.contains(&"delegator_reconcile_duration_seconds".to_string()));
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        ControllerMetrics::register(&registry).unwrap();
        assert!(matches!(
            ControllerMetrics::register(&registry),
            Err(Error::Metrics(_))
        ));
    }
}
