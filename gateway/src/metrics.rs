//! Prometheus metrics for the gateway, gathered into one registry and served
//! from the `/metrics` route.

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry};

/// The gateway's metric set. One instance per process.
pub struct GatewayMetrics {
    registry: Registry,
    /// Transactions currently tracked in the in-flight table.
    pub txns_inflight: IntGauge,
    /// Replies delivered, labelled by outcome
    /// (success / failure / timeout / error).
    pub replies: IntCounterVec,
    /// Observed submission-to-receipt latency.
    pub receipt_wait: Histogram,
}

impl GatewayMetrics {
    /// Create and register the metric set.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        let txns_inflight = IntGauge::with_opts(Opts::new(
            "ethgate_txns_inflight",
            "Transactions currently in flight",
        ))?;
        let replies = IntCounterVec::new(
            Opts::new("ethgate_replies_total", "Replies delivered by outcome"),
            &["outcome"],
        )?;
        let receipt_wait = Histogram::with_opts(
            HistogramOpts::new(
                "ethgate_receipt_wait_seconds",
                "Submission-to-receipt latency",
            )
            .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
        )?;
        registry.register(Box::new(txns_inflight.clone()))?;
        registry.register(Box::new(replies.clone()))?;
        registry.register(Box::new(receipt_wait.clone()))?;
        Ok(Self {
            registry,
            txns_inflight,
            replies,
            receipt_wait,
        })
    }

    /// Encode the registry in the Prometheus text format.
    pub fn gather(&self) -> prometheus::Result<Vec<u8>> {
        let metrics = self.registry.gather();
        let mut buf = Vec::with_capacity(16 * 1024);
        prometheus::TextEncoder::new().encode(&metrics, &mut buf)?;
        Ok(buf)
    }
}
