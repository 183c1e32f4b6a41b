// Private module declaration
mod server;

use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry};

use crate::collaborators::Collaborator;
use crate::utils::CircuitState;

// Re-export for public API
pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for the fulfillment engine
// ============================================================================
//
// Provides metrics for:
// - Transitions per outcome and their latency
// - Collaborator failures and circuit breaker state
// - Concurrent modification conflicts
// - Stock notification retries and failures
//
// All metrics are registered with Prometheus and can be scraped via /metrics
// ============================================================================

/// How a transition request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Committed,
    /// Valid request that changed nothing (e.g. repeated separation report)
    Unchanged,
    Rejected,
    Failed,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Committed => "committed",
            Outcome::Unchanged => "unchanged",
            Outcome::Rejected => "rejected",
            Outcome::Failed => "failed",
        }
    }
}

pub struct Metrics {
    registry: Registry,

    // Transition Metrics
    pub transitions_total: IntCounterVec,
    pub transition_duration: HistogramVec,

    // Collaborator Metrics
    pub collaborator_failures: IntCounterVec,
    pub circuit_breaker_state: IntGaugeVec,

    // Concurrency Metrics
    pub concurrent_conflicts: IntCounter,

    // Stock Notification Metrics
    pub stock_notification_failures: IntCounter,
    pub retry_attempts_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let transitions_total = IntCounterVec::new(
            Opts::new("fulfillment_transitions_total", "Order transitions by outcome"),
            &["transition", "outcome"],
        )?;
        registry.register(Box::new(transitions_total.clone()))?;

        let transition_duration = HistogramVec::new(
            HistogramOpts::new("fulfillment_transition_duration_seconds", "Order transition duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["transition"],
        )?;
        registry.register(Box::new(transition_duration.clone()))?;

        let collaborator_failures = IntCounterVec::new(
            Opts::new("fulfillment_collaborator_failures_total", "Failed or timed-out collaborator calls"),
            &["collaborator"],
        )?;
        registry.register(Box::new(collaborator_failures.clone()))?;

        let circuit_breaker_state = IntGaugeVec::new(
            Opts::new(
                "fulfillment_circuit_breaker_state",
                "Circuit breaker state per collaborator (0=Closed, 1=Open, 2=HalfOpen)",
            ),
            &["collaborator"],
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        let concurrent_conflicts = IntCounter::new(
            "fulfillment_concurrent_conflicts_total",
            "Transitions rejected because another one was in flight or the version was stale",
        )?;
        registry.register(Box::new(concurrent_conflicts.clone()))?;

        let stock_notification_failures = IntCounter::new(
            "fulfillment_stock_notification_failures_total",
            "Stock movements that could not be recorded after all retries",
        )?;
        registry.register(Box::new(stock_notification_failures.clone()))?;

        let retry_attempts_total = IntCounterVec::new(
            Opts::new("fulfillment_retry_attempts_total", "Stock notification attempts"),
            &["operation", "attempt"],
        )?;
        registry.register(Box::new(retry_attempts_total.clone()))?;

        Ok(Self {
            registry,
            transitions_total,
            transition_duration,
            collaborator_failures,
            circuit_breaker_state,
            concurrent_conflicts,
            stock_notification_failures,
            retry_attempts_total,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// `transition` is the operation name, e.g. `confirm` or `create_order`.
    pub fn record_transition(&self, transition: &str, outcome: Outcome, duration_secs: f64) {
        self.transitions_total
            .with_label_values(&[transition, outcome.as_str()])
            .inc();
        self.transition_duration
            .with_label_values(&[transition])
            .observe(duration_secs);
    }

    pub fn record_collaborator_failure(&self, collaborator: Collaborator) {
        self.collaborator_failures.with_label_values(&[collaborator.as_str()]).inc();
    }

    pub fn update_circuit_breaker_state(&self, collaborator: Collaborator, state: CircuitState) {
        self.circuit_breaker_state
            .with_label_values(&[collaborator.as_str()])
            .set(state.as_gauge());
    }

    pub fn record_conflict(&self) {
        self.concurrent_conflicts.inc();
    }

    pub fn record_retry_attempt(&self, operation: &str, attempt: u32) {
        let attempt = attempt.to_string();
        self.retry_attempts_total
            .with_label_values(&[operation, attempt.as_str()])
            .inc();
    }

    pub fn record_stock_notification_failure(&self) {
        self.stock_notification_failures.inc();
    }
}
