use std::sync::Arc;

use datahub_metrics::{
    aggregator::{
        AggregatorContext, ApplicationMetrics, ClusterMetrics, ControllerMetrics, InfluxNodeMetrics, MetricsDao,
        NamespaceMetrics, NodeMetric, NodeMetrics, PodMetrics,
    },
    api::{self, AppState},
    backend::{HttpInfluxClient, HttpPrometheusClient, InfluxClient, PrometheusClient},
    collector::Collector,
    config::{Config, NodeMetricsBackend},
    logging,
    metadata::{InMemoryMetadata, Inventory, MetadataDao},
    metrics::Stats,
    DatahubError, Result,
};
use slog::info as log_info;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("datahub_metrics: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    logging::init_tracing()?;
    let config = Config::from_env()?;
    let logger = logging::setup_logger(&config.cluster_uid);
    let stats = Stats::new()?;

    let metadata: Arc<dyn MetadataDao> = match &config.inventory_path {
        Some(path) => Arc::new(InMemoryMetadata::from_file(path)?),
        None => Arc::new(InMemoryMetadata::new(Inventory::default())),
    };

    let ctx = AggregatorContext {
        cluster_uid: config.cluster_uid.clone(),
        collector: Collector::new(logger.clone(), stats.clone()).with_policy(config.failure_policy),
        metadata,
        logger: logger.clone(),
        stats: stats.clone(),
    };

    let prometheus: Arc<dyn PrometheusClient> =
        Arc::new(HttpPrometheusClient::new(config.prometheus()?, logger.clone(), stats.clone())?);

    let nodes: Arc<dyn MetricsDao<NodeMetric>> = match config.node_metrics_backend {
        NodeMetricsBackend::Prometheus => Arc::new(NodeMetrics::new(ctx.clone(), Arc::clone(&prometheus))),
        NodeMetricsBackend::InfluxDb => {
            let influx: Arc<dyn InfluxClient> =
                Arc::new(HttpInfluxClient::new(config.influxdb(), logger.clone(), stats.clone())?);
            Arc::new(InfluxNodeMetrics::new(ctx.clone(), influx))
        }
    };

    let state = AppState {
        nodes,
        pods: Arc::new(PodMetrics::new(ctx.clone(), Arc::clone(&prometheus))),
        namespaces: Arc::new(NamespaceMetrics::new(ctx.clone(), Arc::clone(&prometheus))),
        controllers: Arc::new(ControllerMetrics::new(ctx.clone(), Arc::clone(&prometheus))),
        clusters: Arc::new(ClusterMetrics::new(ctx.clone(), Arc::clone(&prometheus))),
        applications: Arc::new(ApplicationMetrics::new(ctx, prometheus)),
        stats,
    };

    log_info!(logger, "aggregators ready"; "node_backend" => format!("{:?}", config.node_metrics_backend),
        "policy" => format!("{:?}", config.failure_policy));

    let app = api::router(state);
    info!("Starting datahub metrics on {}", config.bind_addr);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .map_err(|e| DatahubError::Config(format!("Failed to bind to {}: {}", config.bind_addr, e)))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| DatahubError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}
