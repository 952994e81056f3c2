//! Prometheus plumbing shared by the engine and the HTTP surface.

use anyhow::{Context as _, Result};
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use std::sync::Arc;

/// Text-encodes a prometheus registry for the metrics endpoint.
pub struct MetricsHandler {
    registry: Arc<Registry>,
    encoder: TextEncoder,
}

impl MetricsHandler {
    /// Creates a new metrics handler from the specified registry using the
    /// default metrics data text encoding.
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            encoder: TextEncoder::new(),
        }
    }

    /// Returns the encoding content type together with the encoded metrics
    /// data.
    pub fn encode(&self) -> Result<(String, Vec<u8>)> {
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        self.encoder
            .encode(&metric_families, &mut buffer)
            .context("could not encode metrics")?;
        Ok((self.encoder.format_type().to_owned(), buffer))
    }
}

/// Counters and histograms describing the pricing engine.
#[derive(Clone)]
pub struct EngineMetrics {
    recommendations: IntCounter,
    inference_failures: IntCounter,
    scanned_candidates: Histogram,
}

impl EngineMetrics {
    pub fn new(registry: &Registry) -> Result<Self> {
        let recommendations = IntCounter::new(
            "pricing_recommendations_total",
            "Number of price recommendations computed.",
        )?;
        registry.register(Box::new(recommendations.clone()))?;

        let inference_failures = IntCounter::new(
            "pricing_inference_failures_total",
            "Number of scans aborted by a model inference failure.",
        )?;
        registry.register(Box::new(inference_failures.clone()))?;

        let scanned_candidates = Histogram::with_opts(
            HistogramOpts::new(
                "pricing_scanned_candidates",
                "Number of candidate prices scored per recommendation.",
            )
            .buckets(vec![20.0, 50.0, 100.0, 200.0, 250.0, 300.0]),
        )?;
        registry.register(Box::new(scanned_candidates.clone()))?;

        Ok(Self {
            recommendations,
            inference_failures,
            scanned_candidates,
        })
    }

    pub fn recommendation_computed(&self, scanned_candidates: usize) {
        self.recommendations.inc();
        self.scanned_candidates.observe(scanned_candidates as f64);
    }

    pub fn inference_failed(&self) {
        self.inference_failures.inc();
    }
}
