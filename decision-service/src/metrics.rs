//! Prometheus metrics for the decision service.

use prometheus::{
    CounterVec, Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder,
};

pub struct ServiceMetrics {
    registry: Registry,
    pub decisions_total: CounterVec,
    pub snapshot_reloads_total: IntCounter,
    pub snapshot_reload_failures_total: IntCounter,
    pub audit_records_total: IntCounter,
    pub decision_duration_seconds: Histogram,
}

impl ServiceMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let decisions_total = CounterVec::new(
            Opts::new("authz_decisions_total", "Authorization decisions by effect"),
            &["effect"],
        )?;
        let snapshot_reloads_total = IntCounter::with_opts(Opts::new(
            "snapshot_reloads_total",
            "Completed snapshot reloads",
        ))?;
        let snapshot_reload_failures_total = IntCounter::with_opts(Opts::new(
            "snapshot_reload_failures_total",
            "Snapshot reloads that failed and kept the previous snapshot",
        ))?;
        let audit_records_total = IntCounter::with_opts(Opts::new(
            "audit_records_total",
            "Audit records submitted to the analytics pipeline",
        ))?;
        let decision_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "decision_duration_seconds",
                "Policy evaluation latency",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]),
        )?;

        registry.register(Box::new(decisions_total.clone()))?;
        registry.register(Box::new(snapshot_reloads_total.clone()))?;
        registry.register(Box::new(snapshot_reload_failures_total.clone()))?;
        registry.register(Box::new(audit_records_total.clone()))?;
        registry.register(Box::new(decision_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            decisions_total,
            snapshot_reloads_total,
            snapshot_reload_failures_total,
            audit_records_total,
            decision_duration_seconds,
        })
    }

    pub fn observe_decision(&self, allowed: bool, elapsed: std::time::Duration) {
        let effect = if allowed { "allow" } else { "deny" };
        self.decisions_total.with_label_values(&[effect]).inc();
        self.decision_duration_seconds.observe(elapsed.as_secs_f64());
    }

    /// Text exposition for `GET /metrics`.
    pub fn export(&self) -> String {
        let mut out = String::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode_utf8(&self.registry.gather(), &mut out) {
            tracing::error!("failed to encode metrics: {e}");
        }
        out
    }
}
