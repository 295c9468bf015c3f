use std::env;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::backend::influxdb::InfluxConfig;
use crate::backend::prometheus::PrometheusConfig;
use crate::collector::FailurePolicy;
use crate::{DatahubError, Result};

/// Store that serves node metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NodeMetricsBackend {
    #[default]
    Prometheus,
    InfluxDb,
}

impl FromStr for NodeMetricsBackend {
    type Err = DatahubError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "prometheus" => Ok(NodeMetricsBackend::Prometheus),
            "influxdb" => Ok(NodeMetricsBackend::InfluxDb),
            other => Err(DatahubError::Config(format!("unknown node metrics backend: {}", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub cluster_uid: String,
    pub prometheus_url: String,
    pub prometheus_bearer_token_file: Option<PathBuf>,
    pub prometheus_timeout: Duration,
    pub influxdb_url: String,
    pub influxdb_username: Option<String>,
    pub influxdb_password: Option<String>,
    pub influxdb_database: String,
    pub influxdb_timeout: Duration,
    pub node_metrics_backend: NodeMetricsBackend,
    pub inventory_path: Option<PathBuf>,
    pub failure_policy: FailurePolicy,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`Config::from_env`] with variables read through `lookup`.
    /// Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let prometheus_timeout = match get("DATAHUB_PROMETHEUS_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(parse("DATAHUB_PROMETHEUS_TIMEOUT_SECS", &raw)?),
            None => Duration::from_secs(30),
        };
        let influxdb_timeout = match get("DATAHUB_INFLUXDB_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(parse("DATAHUB_INFLUXDB_TIMEOUT_SECS", &raw)?),
            None => Duration::from_secs(30),
        };
        let node_metrics_backend = match get("DATAHUB_NODE_METRICS_BACKEND") {
            Some(raw) => raw.parse()?,
            None => NodeMetricsBackend::default(),
        };
        let cancel_on_error = match get("DATAHUB_CANCEL_ON_ERROR") {
            Some(raw) => parse::<bool>("DATAHUB_CANCEL_ON_ERROR", &raw)?,
            None => true,
        };

        Ok(Self {
            bind_addr: or("DATAHUB_BIND_ADDR", "0.0.0.0:50050"),
            cluster_uid: or("DATAHUB_CLUSTER_UID", "default"),
            prometheus_url: or("DATAHUB_PROMETHEUS_URL", "http://prometheus:9090"),
            prometheus_bearer_token_file: get("DATAHUB_PROMETHEUS_BEARER_TOKEN_FILE").map(PathBuf::from),
            prometheus_timeout,
            influxdb_url: or("DATAHUB_INFLUXDB_URL", "http://influxdb:8086"),
            influxdb_username: get("DATAHUB_INFLUXDB_USERNAME"),
            influxdb_password: get("DATAHUB_INFLUXDB_PASSWORD"),
            influxdb_database: or("DATAHUB_INFLUXDB_DATABASE", "alameda_metric"),
            influxdb_timeout,
            node_metrics_backend,
            inventory_path: get("DATAHUB_INVENTORY_PATH").map(PathBuf::from),
            failure_policy: if cancel_on_error {
                FailurePolicy::CancelSiblings
            } else {
                FailurePolicy::RunToCompletion
            },
        })
    }

    /// Sampling-store client settings; reads the bearer token file if one is set.
    pub fn prometheus(&self) -> Result<PrometheusConfig> {
        let bearer_token = match &self.prometheus_bearer_token_file {
            Some(path) => {
                let token = fs::read_to_string(path).map_err(|e| {
                    DatahubError::Config(format!("reading bearer token {}: {}", path.display(), e))
                })?;
                Some(token.trim().to_string())
            }
            None => None,
        };

        Ok(PrometheusConfig {
            url: self.prometheus_url.clone(),
            bearer_token,
            timeout: self.prometheus_timeout,
        })
    }

    pub fn influxdb(&self) -> InfluxConfig {
        InfluxConfig {
            url: self.influxdb_url.clone(),
            username: self.influxdb_username.clone(),
            password: self.influxdb_password.clone(),
            database: self.influxdb_database.clone(),
            timeout: self.influxdb_timeout,
        }
    }
}

fn parse<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| DatahubError::Config(format!("invalid value for {}: {:?}", key, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = tokio_test::assert_ok!(config(&[]));
        assert_eq!(cfg.bind_addr, "0.0.0.0:50050");
        assert_eq!(cfg.cluster_uid, "default");
        assert_eq!(cfg.prometheus_timeout, Duration::from_secs(30));
        assert_eq!(cfg.influxdb_database, "alameda_metric");
        assert_eq!(cfg.influxdb().timeout, Duration::from_secs(30));
        assert_eq!(cfg.node_metrics_backend, NodeMetricsBackend::Prometheus);
        assert_eq!(cfg.failure_policy, FailurePolicy::CancelSiblings);
        assert!(cfg.prometheus().unwrap().bearer_token.is_none());
    }

    #[test]
    fn test_overrides() {
        let cfg = config(&[
            ("DATAHUB_CLUSTER_UID", "c-42"),
            ("DATAHUB_PROMETHEUS_TIMEOUT_SECS", "5"),
            ("DATAHUB_NODE_METRICS_BACKEND", "InfluxDB"),
            ("DATAHUB_CANCEL_ON_ERROR", "false"),
            ("DATAHUB_INFLUXDB_USERNAME", "admin"),
            ("DATAHUB_INFLUXDB_PASSWORD", ""),
            ("DATAHUB_INFLUXDB_TIMEOUT_SECS", "7"),
        ])
        .unwrap();

        assert_eq!(cfg.cluster_uid, "c-42");
        assert_eq!(cfg.prometheus_timeout, Duration::from_secs(5));
        assert_eq!(cfg.node_metrics_backend, NodeMetricsBackend::InfluxDb);
        assert_eq!(cfg.failure_policy, FailurePolicy::RunToCompletion);

        let influx = cfg.influxdb();
        assert_eq!(influx.username.as_deref(), Some("admin"));
        assert_eq!(influx.password, None);
        assert_eq!(influx.timeout, Duration::from_secs(7));
    }

    #[test]
    fn test_invalid_values() {
        for (key, value) in [
            ("DATAHUB_PROMETHEUS_TIMEOUT_SECS", "soon"),
            ("DATAHUB_CANCEL_ON_ERROR", "maybe"),
            ("DATAHUB_INFLUXDB_TIMEOUT_SECS", "-1"),
            ("DATAHUB_NODE_METRICS_BACKEND", "graphite"),
        ] {
            let err = tokio_test::assert_err!(config(&[(key, value)]));
            assert!(matches!(err, DatahubError::Config(_)), "{}", key);
        }
    }

    #[test]
    fn test_missing_token_file() {
        let cfg = config(&[("DATAHUB_PROMETHEUS_BEARER_TOKEN_FILE", "/nonexistent/token")]).unwrap();
        assert!(matches!(cfg.prometheus().unwrap_err(), DatahubError::Config(_)));
    }
}
