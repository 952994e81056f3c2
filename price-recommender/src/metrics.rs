//! Per-request HTTP metrics fed from warp's request log.

use anyhow::Result;
use prometheus::{HistogramOpts, HistogramVec, Registry};

pub struct Metrics {
    requests: HistogramVec,
}

impl Metrics {
    pub fn new(registry: &Registry) -> Result<Self> {
        let requests = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "Request duration by method and response status.",
            ),
            &["method", "status"],
        )?;
        registry.register(Box::new(requests.clone()))?;
        Ok(Self { requests })
    }

    pub fn handle_response(&self, info: warp::log::Info) {
        self.requests
            .with_label_values(&[info.method().as_str(), info.status().as_str()])
            .observe(info.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_on_a_fresh_registry() {
        let registry = Registry::new();
        assert!(Metrics::new(&registry).is_ok());
        // A second registration on the same registry must fail loudly
        // instead of double counting.
        assert!(Metrics::new(&registry).is_err());
    }
}
