use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::time::Instant;

use crate::{DatahubError, Result};

/// Self-instrumentation of the aggregation engine. Each `Stats` owns its
/// registry, so tests and embedders never share series through globals.
#[derive(Clone)]
pub struct Stats {
    registry: Registry,
    requests: IntCounterVec,
    request_duration: HistogramVec,
    backend_queries: IntCounterVec,
    backend_errors: IntCounterVec,
    malformed_samples: IntCounterVec,
}

impl Stats {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("datahub_requests_total", "Total number of metric requests received"),
            &["kind"],
        )
        .map_err(stats_error)?;

        let request_duration = HistogramVec::new(
            HistogramOpts::new("datahub_request_duration_seconds", "Metric request duration in seconds")
                .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0]),
            &["kind"],
        )
        .map_err(stats_error)?;

        let backend_queries = IntCounterVec::new(
            Opts::new("datahub_backend_queries_total", "Total number of queries issued to a backend"),
            &["source"],
        )
        .map_err(stats_error)?;

        let backend_errors = IntCounterVec::new(
            Opts::new("datahub_backend_errors_total", "Total number of failed backend queries"),
            &["source"],
        )
        .map_err(stats_error)?;

        let malformed_samples = IntCounterVec::new(
            Opts::new("datahub_malformed_samples_total", "Samples or series skipped as malformed"),
            &["source"],
        )
        .map_err(stats_error)?;

        registry.register(Box::new(requests.clone())).map_err(stats_error)?;
        registry.register(Box::new(request_duration.clone())).map_err(stats_error)?;
        registry.register(Box::new(backend_queries.clone())).map_err(stats_error)?;
        registry.register(Box::new(backend_errors.clone())).map_err(stats_error)?;
        registry.register(Box::new(malformed_samples.clone())).map_err(stats_error)?;

        Ok(Self {
            registry,
            requests,
            request_duration,
            backend_queries,
            backend_errors,
            malformed_samples,
        })
    }

    /// Counts the request now and observes its duration when the timer drops.
    pub fn request_timer(&self, kind: &str) -> RequestTimer {
        self.requests.with_label_values(&[kind]).inc();
        RequestTimer {
            histogram: self.request_duration.with_label_values(&[kind]),
            start: Instant::now(),
        }
    }

    pub fn record_backend_query(&self, source: &str) {
        self.backend_queries.with_label_values(&[source]).inc();
    }

    pub fn record_backend_error(&self, source: &str) {
        self.backend_errors.with_label_values(&[source]).inc();
    }

    pub fn record_malformed(&self, source: &str) {
        self.malformed_samples.with_label_values(&[source]).inc();
    }

    pub fn backend_queries(&self, source: &str) -> u64 {
        self.backend_queries.with_label_values(&[source]).get()
    }

    pub fn backend_errors(&self, source: &str) -> u64 {
        self.backend_errors.with_label_values(&[source]).get()
    }

    pub fn malformed(&self, source: &str) -> u64 {
        self.malformed_samples.with_label_values(&[source]).get()
    }

    /// Text exposition of every registered series.
    pub fn render(&self) -> Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buf)
            .map_err(stats_error)?;
        String::from_utf8(buf).map_err(|e| DatahubError::Internal(e.to_string()))
    }
}

fn stats_error(err: prometheus::Error) -> DatahubError {
    DatahubError::Internal(format!("stats: {}", err))
}

pub struct RequestTimer {
    histogram: prometheus::Histogram,
    start: Instant,
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}
