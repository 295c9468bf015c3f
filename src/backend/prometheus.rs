use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use slog::{debug, warn, Logger};

use super::{timestamp_from_secs, LabeledSeries};
use crate::metric::{MetricSeries, Sample};
use crate::metrics::Stats;
use crate::query::QueryCondition;
use crate::{DatahubError, Result};

pub const SOURCE: &str = "prometheus";

/// Range-query access to the sampling store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PrometheusClient: Send + Sync {
    /// Evaluates `expr` over the condition's time range. Missing bounds
    /// default to the Unix epoch, now, and a 30 second step.
    async fn query_range(&self, expr: &str, condition: &QueryCondition) -> Result<Vec<LabeledSeries>>;
}

#[derive(Debug, Clone)]
pub struct PrometheusConfig {
    pub url: String,
    pub bearer_token: Option<String>,
    pub timeout: Duration,
}

pub struct HttpPrometheusClient {
    cfg: PrometheusConfig,
    http: reqwest::Client,
    logger: Logger,
    stats: Stats,
}

impl HttpPrometheusClient {
    pub fn new(cfg: PrometheusConfig, logger: Logger, stats: Stats) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(cfg.timeout).build()?;
        Ok(Self {
            cfg,
            http,
            logger: logger.new(slog::o!("backend" => SOURCE)),
            stats,
        })
    }

    async fn send(&self, expr: &str, condition: &QueryCondition) -> Result<ApiResponse> {
        let url = format!("{}/api/v1/query_range", self.cfg.url.trim_end_matches('/'));
        let mut params = range_params(expr, condition);
        if let Some(timeout) = condition.timeout {
            params.push(("timeout", format!("{}s", timeout.as_secs())));
        }

        let mut req = self.http.get(&url).query(&params);
        if let Some(token) = &self.cfg.bearer_token {
            req = req.bearer_auth(token);
        }
        if let Some(timeout) = condition.timeout {
            req = req.timeout(timeout);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if body.is_empty() && !status.is_success() {
            return Err(DatahubError::Backend(format!("query_range returned {}", status)));
        }
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl PrometheusClient for HttpPrometheusClient {
    async fn query_range(&self, expr: &str, condition: &QueryCondition) -> Result<Vec<LabeledSeries>> {
        debug!(self.logger, "query_range"; "expr" => expr);
        self.stats.record_backend_query(SOURCE);

        let result = self
            .send(expr, condition)
            .await
            .and_then(|resp| decode(resp, &self.logger, &self.stats));
        if result.is_err() {
            self.stats.record_backend_error(SOURCE);
        }
        result
    }
}

fn range_params(expr: &str, condition: &QueryCondition) -> Vec<(&'static str, String)> {
    let start = condition.start.map(|t| t.timestamp()).unwrap_or(0);
    let end = condition.end.unwrap_or_else(Utc::now).timestamp();
    let step = condition.step_or_default().as_secs();

    vec![
        ("query", expr.to_string()),
        ("start", start.to_string()),
        ("end", end.to_string()),
        ("step", format!("{}s", step)),
    ]
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default, rename = "errorType")]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
enum QueryData {
    Matrix(Vec<RangeSeries>),
    Vector(Vec<InstantSample>),
    Scalar((f64, String)),
}

#[derive(Debug, Deserialize)]
struct RangeSeries {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    #[serde(default)]
    values: Vec<(f64, String)>,
}

#[derive(Debug, Deserialize)]
struct InstantSample {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    value: (f64, String),
}

fn decode(resp: ApiResponse, logger: &Logger, stats: &Stats) -> Result<Vec<LabeledSeries>> {
    if resp.status != "success" {
        return Err(DatahubError::Backend(format!(
            "{}: {}",
            resp.error_type.unwrap_or_else(|| resp.status.clone()),
            resp.error.unwrap_or_default()
        )));
    }

    let raw: Vec<(BTreeMap<String, String>, Vec<(f64, String)>)> = match resp.data {
        None => Vec::new(),
        Some(QueryData::Matrix(series)) => series.into_iter().map(|s| (s.metric, s.values)).collect(),
        Some(QueryData::Vector(samples)) => samples.into_iter().map(|s| (s.metric, vec![s.value])).collect(),
        Some(QueryData::Scalar(value)) => vec![(BTreeMap::new(), vec![value])],
    };

    Ok(raw
        .into_iter()
        .map(|(labels, values)| {
            let series: MetricSeries = values
                .into_iter()
                .filter_map(|(ts, value)| match (timestamp_from_secs(ts), value.parse::<f64>()) {
                    (Some(time), Ok(value)) => Some(Sample::new(time, value)),
                    _ => {
                        warn!(logger, "skipping malformed sample"; "labels" => ?labels, "timestamp" => ts, "value" => &value);
                        stats.record_malformed(SOURCE);
                        None
                    }
                })
                .collect();
            LabeledSeries::new(labels, series)
        })
        .collect())
}
