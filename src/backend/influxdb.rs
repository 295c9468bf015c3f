use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use slog::{debug, warn, Logger};

use super::{timestamp_from_secs, LabeledSeries};
use crate::metric::{MetricSeries, Sample};
use crate::metrics::Stats;
use crate::query::QueryCondition;
use crate::{DatahubError, Result};

pub const SOURCE: &str = "influxdb";

/// Column-store access: InfluxQL reads and line-protocol writes against one database.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InfluxClient: Send + Sync {
    /// Runs `command`, giving up once the condition's timeout elapses.
    async fn query(&self, command: &str, condition: &QueryCondition) -> Result<Vec<LabeledSeries>>;

    async fn write_points(&self, points: Vec<Point>) -> Result<()>;
}

/// One line-protocol point with second precision.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, f64>,
    pub time: DateTime<Utc>,
}

impl Point {
    pub fn new(measurement: &str, time: DateTime<Utc>) -> Self {
        Self {
            measurement: measurement.to_string(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            time,
        }
    }

    pub fn tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    pub fn field(mut self, key: &str, value: f64) -> Self {
        self.fields.insert(key.to_string(), value);
        self
    }

    /// `measurement,tag=v field=v <unix seconds>`. Empty tag values are left out.
    pub fn to_line(&self) -> String {
        let mut line = escape(&self.measurement, &[',', ' ']);
        for (key, value) in self.tags.iter().filter(|(_, v)| !v.is_empty()) {
            let _ = write!(line, ",{}={}", escape(key, &[',', '=', ' ']), escape(value, &[',', '=', ' ']));
        }

        let fields: Vec<String> = self
            .fields
            .iter()
            .map(|(key, value)| format!("{}={}", escape(key, &[',', '=', ' ']), value))
            .collect();
        let _ = write!(line, " {} {}", fields.join(","), self.time.timestamp());
        line
    }
}

fn escape(value: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c == '\\' || special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[derive(Debug, Clone)]
pub struct InfluxConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: String,
    /// Applies to every call; a query condition may ask for less.
    pub timeout: Duration,
}

pub struct HttpInfluxClient {
    cfg: InfluxConfig,
    http: reqwest::Client,
    logger: Logger,
    stats: Stats,
}

impl HttpInfluxClient {
    pub fn new(cfg: InfluxConfig, logger: Logger, stats: Stats) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(cfg.timeout).build()?;
        let logger = logger.new(slog::o!("backend" => SOURCE, "database" => cfg.database.clone()));
        Ok(Self {
            cfg,
            http,
            logger,
            stats,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.cfg.url.trim_end_matches('/'), path)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.cfg.username {
            Some(user) => req.basic_auth(user, self.cfg.password.as_ref()),
            None => req,
        }
    }

    async fn send_query(&self, command: &str, condition: &QueryCondition) -> Result<QueryResponse> {
        let mut req = self.http.get(self.endpoint("query")).query(&[
            ("db", self.cfg.database.as_str()),
            ("q", command),
            ("epoch", "s"),
        ]);
        if let Some(timeout) = condition.timeout {
            req = req.timeout(timeout);
        }
        let resp = self.authorize(req).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if body.is_empty() && !status.is_success() {
            return Err(DatahubError::Backend(format!("query returned {}", status)));
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn send_write(&self, body: String) -> Result<()> {
        let req = self
            .http
            .post(self.endpoint("write"))
            .query(&[("db", self.cfg.database.as_str()), ("precision", "s")])
            .body(body);
        let resp = self.authorize(req).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(DatahubError::Backend(format!("write returned {}: {}", status, text)));
        }
        Ok(())
    }
}

#[async_trait]
impl InfluxClient for HttpInfluxClient {
    async fn query(&self, command: &str, condition: &QueryCondition) -> Result<Vec<LabeledSeries>> {
        debug!(self.logger, "query"; "command" => command);
        self.stats.record_backend_query(SOURCE);

        let result = self
            .send_query(command, condition)
            .await
            .and_then(|resp| decode(resp, &self.logger, &self.stats));
        if result.is_err() {
            self.stats.record_backend_error(SOURCE);
        }
        result
    }

    async fn write_points(&self, points: Vec<Point>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        debug!(self.logger, "write_points"; "count" => points.len());
        self.stats.record_backend_query(SOURCE);

        let body = points.iter().map(Point::to_line).collect::<Vec<_>>().join("\n");
        let result = self.send_write(body).await;
        if result.is_err() {
            self.stats.record_backend_error(SOURCE);
        }
        result
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    series: Vec<ResultSeries>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResultSeries {
    #[serde(default)]
    tags: BTreeMap<String, String>,
    columns: Vec<String>,
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

/// Flattens every statement's series. Group-by tags become the labels and the
/// `value` column (or the first non-time column) becomes the samples.
fn decode(resp: QueryResponse, logger: &Logger, stats: &Stats) -> Result<Vec<LabeledSeries>> {
    if let Some(err) = resp.error {
        return Err(DatahubError::Backend(err));
    }

    let mut out = Vec::new();
    for result in resp.results {
        if let Some(err) = result.error {
            return Err(DatahubError::Backend(err));
        }

        for series in result.series {
            let Some(time_idx) = series.columns.iter().position(|c| c == "time") else {
                warn!(logger, "skipping series without time column"; "tags" => ?series.tags, "columns" => ?series.columns);
                stats.record_malformed(SOURCE);
                continue;
            };
            let Some(value_idx) = series
                .columns
                .iter()
                .position(|c| c == "value")
                .or_else(|| (0..series.columns.len()).find(|i| *i != time_idx))
            else {
                warn!(logger, "skipping series without value column"; "tags" => ?series.tags, "columns" => ?series.columns);
                stats.record_malformed(SOURCE);
                continue;
            };

            let samples: MetricSeries = series
                .values
                .iter()
                .filter_map(|row| {
                    let value = row.get(value_idx)?;
                    if value.is_null() {
                        return None;
                    }
                    let time = row.get(time_idx).and_then(|t| t.as_f64()).and_then(timestamp_from_secs);
                    match (time, as_number(value)) {
                        (Some(time), Some(value)) => Some(Sample::new(time, value)),
                        _ => {
                            warn!(logger, "skipping malformed row"; "tags" => ?series.tags, "row" => ?row);
                            stats.record_malformed(SOURCE);
                            None
                        }
                    }
                })
                .collect();

            out.push(LabeledSeries::new(series.tags, samples));
        }
    }
    Ok(out)
}

fn as_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
