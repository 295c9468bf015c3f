//! Clients of the two time-series stores. Both hand back labeled sample
//! series so metric sources can treat them the same way.

pub mod influxdb;
pub mod prometheus;

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};

use crate::metric::MetricSeries;
use crate::{DatahubError, Result};

pub use self::influxdb::{HttpInfluxClient, InfluxClient, Point};
pub use self::prometheus::{HttpPrometheusClient, PrometheusClient};

/// One series as returned by a backend: its identifying labels and samples.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabeledSeries {
    pub labels: BTreeMap<String, String>,
    pub series: MetricSeries,
}

impl LabeledSeries {
    pub fn new(labels: BTreeMap<String, String>, series: MetricSeries) -> Self {
        Self { labels, series }
    }

    /// Value of a label that must be present and non-empty.
    pub fn label(&self, key: &str) -> Result<&str> {
        match self.labels.get(key) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(DatahubError::MalformedResult(format!(
                "series {:?} has no label {:?}",
                self.labels, key
            ))),
        }
    }

    pub fn label_or_empty(&self, key: &str) -> &str {
        self.labels.get(key).map(String::as_str).unwrap_or("")
    }
}

pub(crate) fn timestamp_from_secs(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    Utc.timestamp_millis_opt((secs * 1000.0).round() as i64).single()
}
