use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub lifecycle_operations_total: IntCounterVec,
    pub lifecycle_latency_seconds: HistogramVec,
    pub operations_in_flight: IntGauge,
    pub view_refreshes_total: IntCounterVec,
    pub stale_snapshots_discarded_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let lifecycle_operations_total = IntCounterVec::new(
            Opts::new(
                "lifecycle_operations_total",
                "Lifecycle operations by operation and outcome",
            ),
            &["operation", "outcome"],
        )
        .expect("valid lifecycle_operations_total metric");

        let lifecycle_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "lifecycle_latency_seconds",
                "Latency of lifecycle operations in seconds",
            ),
            &["operation"],
        )
        .expect("valid lifecycle_latency_seconds metric");

        let operations_in_flight = IntGauge::new(
            "operations_in_flight",
            "Lifecycle operations currently holding an in-flight slot",
        )
        .expect("valid operations_in_flight metric");

        let view_refreshes_total = IntCounterVec::new(
            Opts::new("view_refreshes_total", "Dashboard view recomputations by trigger"),
            &["trigger"],
        )
        .expect("valid view_refreshes_total metric");

        let stale_snapshots_discarded_total = IntCounter::new(
            "stale_snapshots_discarded_total",
            "View snapshots dropped because a newer generation was installed",
        )
        .expect("valid stale_snapshots_discarded_total metric");

        registry
            .register(Box::new(lifecycle_operations_total.clone()))
            .expect("register lifecycle_operations_total");
        registry
            .register(Box::new(lifecycle_latency_seconds.clone()))
            .expect("register lifecycle_latency_seconds");
        registry
            .register(Box::new(operations_in_flight.clone()))
            .expect("register operations_in_flight");
        registry
            .register(Box::new(view_refreshes_total.clone()))
            .expect("register view_refreshes_total");
        registry
            .register(Box::new(stale_snapshots_discarded_total.clone()))
            .expect("register stale_snapshots_discarded_total");

        Self {
            registry,
            lifecycle_operations_total,
            lifecycle_latency_seconds,
            operations_in_flight,
            view_refreshes_total,
            stale_snapshots_discarded_total,
        }
    }

    pub fn record(&self, operation: &str, outcome: &str, elapsed_secs: f64) {
        self.lifecycle_operations_total
            .with_label_values(&[operation, outcome])
            .inc();
        self.lifecycle_latency_seconds
            .with_label_values(&[operation])
            .observe(elapsed_secs);
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
