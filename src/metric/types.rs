use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::query::Order;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    CpuUsageSecondsPercentage,
    MemoryUsageBytes,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::CpuUsageSecondsPercentage => "cpu_usage_seconds_percentage",
            MetricType::MemoryUsageBytes => "memory_usage_bytes",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One timestamped value. Numeric in memory, a decimal string on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub time: DateTime<Utc>,
    #[serde(serialize_with = "serialize_decimal", deserialize_with = "deserialize_decimal")]
    pub value: f64,
}

impl Sample {
    pub fn new(time: DateTime<Utc>, value: f64) -> Self {
        Self { time, value }
    }
}

fn serialize_decimal<S: Serializer>(value: &f64, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

fn deserialize_decimal<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Decimal {
        Text(String),
        Number(f64),
    }

    match Decimal::deserialize(deserializer)? {
        Decimal::Number(n) => Ok(n),
        Decimal::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

/// Samples of one metric type in insertion order until sorted or limited.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricSeries(Vec<Sample>);

impl MetricSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: Sample) {
        self.0.push(sample);
    }

    pub fn append(&mut self, other: MetricSeries) {
        self.0.extend(other.0);
    }

    /// Stable sort; `Unordered` keeps insertion order.
    pub fn sort_by_timestamp(&mut self, order: Order) {
        match order {
            Order::Unordered => {}
            Order::Asc => self.0.sort_by_key(|s| s.time),
            Order::Desc => self.0.sort_by(|a, b| b.time.cmp(&a.time)),
        }
    }

    /// Keeps at most `n` samples; 0 keeps everything.
    pub fn limit(&mut self, n: usize) {
        if n > 0 {
            self.0.truncate(n);
        }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Sample>> for MetricSeries {
    fn from(samples: Vec<Sample>) -> Self {
        Self(samples)
    }
}

impl FromIterator<Sample> for MetricSeries {
    fn from_iter<T: IntoIterator<Item = Sample>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
