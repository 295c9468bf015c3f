use std::sync::Arc;

use async_trait::async_trait;

use super::signals::{self, Signal, LABEL_CONTAINER, LABEL_NAMESPACE, LABEL_POD};
use super::{find, unsupported_write, AggregatorContext, ListMetricsRequest, MetricsDao, PromSource};
use crate::backend::{LabeledSeries, PrometheusClient};
use crate::collector::{group_by, DynSource};
use crate::metric::{ContainerIdentity, ContainerMetric, MetricMap, MetricType, PodIdentity, PodMetric, ResourceMetric};
use crate::query::QueryCondition;
use crate::Result;

const KIND: &str = "pod";

/// Pod metrics assembled from container-level series, one query per namespace and signal.
pub struct PodMetrics {
    ctx: AggregatorContext,
    sources: Vec<DynSource<PodMetric>>,
}

impl PodMetrics {
    pub fn new(ctx: AggregatorContext, client: Arc<dyn PrometheusClient>) -> Self {
        let sources = [Signal::Cpu, Signal::Memory]
            .into_iter()
            .map(|signal| {
                Arc::new(PromSource::<PodMetric> {
                    name: format!("container_{}", signal.name()),
                    signal,
                    client: Arc::clone(&client),
                    partition: by_namespace,
                    expr,
                    convert,
                }) as DynSource<PodMetric>
            })
            .collect();
        Self { ctx, sources }
    }
}

fn by_namespace(ids: &[PodIdentity]) -> Vec<Vec<PodIdentity>> {
    group_by(ids, |id| id.namespace.clone())
}

fn expr(signal: Signal, ids: &[PodIdentity], condition: &QueryCondition) -> Result<String> {
    let namespace = ids.first().map(|id| id.namespace.as_str()).unwrap_or_default();
    let filter = signals::container_filter()
        .eq(LABEL_NAMESPACE, namespace)
        .any_of(LABEL_POD, ids.iter().map(|id| id.name.as_str()));
    Ok(signal.scale(signals::container_usage(signal, filter, condition)?))
}

/// Patches the container's full identity from the batch, then builds its pod.
fn convert(raw: LabeledSeries, metric_type: MetricType, ids: &[PodIdentity]) -> Result<PodMetric> {
    let namespace = raw.label(LABEL_NAMESPACE)?;
    let pod_name = raw.label(LABEL_POD)?;
    let container = raw.label(LABEL_CONTAINER)?.to_string();

    let pod = find(ids, pod_name, |id| id.namespace == namespace && id.name == pod_name)?;
    let identity = ContainerIdentity {
        pod: pod.clone(),
        name: container,
    };
    let metric: ContainerMetric = ResourceMetric::with_series(identity, metric_type, raw.series);
    Ok(PodMetric::from(metric))
}

#[async_trait]
impl MetricsDao<PodMetric> for PodMetrics {
    async fn list_metrics(&self, req: &ListMetricsRequest) -> Result<MetricMap<PodMetric>> {
        let _timer = self.ctx.stats.request_timer(KIND);
        let ids = self.ctx.metadata.list_pods(&req.object_metas).await?;
        self.ctx.aggregate(KIND, ids, &self.sources, &req.condition).await
    }

    async fn create_metrics(&self, _metrics: MetricMap<PodMetric>) -> Result<()> {
        Err(unsupported_write(KIND))
    }
}
