//! HTTP surface over the aggregators.

use std::sync::Arc;

use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::aggregator::{
    ApplicationMetric, ClusterMetric, ControllerMetric, ListMetricsPayload, ListMetricsRequest, MetricsDao,
    NamespaceMetric, NodeMetric,
};
use crate::metric::{MetricEntry, MetricMap, PodMetric};
use crate::metrics::Stats;
use crate::Result;

#[derive(Clone)]
pub struct AppState {
    pub nodes: Arc<dyn MetricsDao<NodeMetric>>,
    pub pods: Arc<dyn MetricsDao<PodMetric>>,
    pub namespaces: Arc<dyn MetricsDao<NamespaceMetric>>,
    pub controllers: Arc<dyn MetricsDao<ControllerMetric>>,
    pub clusters: Arc<dyn MetricsDao<ClusterMetric>>,
    pub applications: Arc<dyn MetricsDao<ApplicationMetric>>,
    pub stats: Stats,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1alpha1/metrics/nodes", post(list_nodes).put(create_nodes))
        .route("/v1alpha1/metrics/pods", post(list_pods))
        .route("/v1alpha1/metrics/namespaces", post(list_namespaces))
        .route("/v1alpha1/metrics/controllers", post(list_controllers))
        .route("/v1alpha1/metrics/clusters", post(list_clusters))
        .route("/v1alpha1/metrics/applications", post(list_applications))
        .route("/metrics", get(render_stats))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn list<E: MetricEntry>(
    dao: &dyn MetricsDao<E>,
    kind: &str,
    payload: ListMetricsPayload,
) -> Result<Json<MetricMap<E>>> {
    let req = ListMetricsRequest::from(payload);
    info!(kind, filters = req.object_metas.len(), "listing metrics");
    Ok(Json(dao.list_metrics(&req).await?))
}

async fn list_nodes(
    State(state): State<AppState>,
    Json(payload): Json<ListMetricsPayload>,
) -> Result<Json<MetricMap<NodeMetric>>> {
    list(state.nodes.as_ref(), "node", payload).await
}

async fn list_pods(
    State(state): State<AppState>,
    Json(payload): Json<ListMetricsPayload>,
) -> Result<Json<MetricMap<PodMetric>>> {
    list(state.pods.as_ref(), "pod", payload).await
}

async fn list_namespaces(
    State(state): State<AppState>,
    Json(payload): Json<ListMetricsPayload>,
) -> Result<Json<MetricMap<NamespaceMetric>>> {
    list(state.namespaces.as_ref(), "namespace", payload).await
}

async fn list_controllers(
    State(state): State<AppState>,
    Json(payload): Json<ListMetricsPayload>,
) -> Result<Json<MetricMap<ControllerMetric>>> {
    list(state.controllers.as_ref(), "controller", payload).await
}

async fn list_clusters(
    State(state): State<AppState>,
    Json(payload): Json<ListMetricsPayload>,
) -> Result<Json<MetricMap<ClusterMetric>>> {
    list(state.clusters.as_ref(), "cluster", payload).await
}

async fn list_applications(
    State(state): State<AppState>,
    Json(payload): Json<ListMetricsPayload>,
) -> Result<Json<MetricMap<ApplicationMetric>>> {
    list(state.applications.as_ref(), "application", payload).await
}

async fn create_nodes(
    State(state): State<AppState>,
    Json(metrics): Json<MetricMap<NodeMetric>>,
) -> Result<Json<serde_json::Value>> {
    let written = metrics.len();
    info!(nodes = written, "writing node metrics");
    state.nodes.create_metrics(metrics).await?;
    Ok(Json(serde_json::json!({ "written": written })))
}

async fn render_stats(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let body = state.stats.render()?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}
