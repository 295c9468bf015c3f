use std::sync::Arc;

use async_trait::async_trait;

use super::signals::{self, Signal};
use super::{single, unsupported_write, AggregatorContext, ListMetricsRequest, MetricsDao};
use crate::backend::{LabeledSeries, PrometheusClient};
use crate::collector::{per_identity, DynSource, MetricSource};
use crate::metadata::MetadataDao;
use crate::metric::{retain_tenant, ClusterIdentity, MetricMap, ResourceMetric};
use crate::query::{promql, QueryCondition};
use crate::Result;

pub type ClusterMetric = ResourceMetric<ClusterIdentity>;

const KIND: &str = "cluster";

/// Sum of one signal over the nodes of a cluster.
struct ClusterSource {
    name: String,
    signal: Signal,
    client: Arc<dyn PrometheusClient>,
    metadata: Arc<dyn MetadataDao>,
}

#[async_trait]
impl MetricSource<ClusterMetric> for ClusterSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn partition(&self, ids: &[ClusterIdentity]) -> Vec<Vec<ClusterIdentity>> {
        per_identity(ids)
    }

    async fn fetch(&self, ids: &[ClusterIdentity], condition: &QueryCondition) -> Result<Vec<LabeledSeries>> {
        let cluster = single(ids)?;
        let nodes = retain_tenant(self.metadata.list_nodes_by_cluster(cluster).await?, &cluster.name);
        if nodes.is_empty() {
            return Ok(Vec::new());
        }

        let filter = signals::node_filter(nodes.iter().map(|n| n.name.as_str()));
        let usage = signals::node_usage(self.signal, &filter, condition)?;
        let expr = self.signal.scale(promql::sum(&usage));
        self.client.query_range(&expr, condition).await
    }

    fn convert(&self, raw: LabeledSeries, ids: &[ClusterIdentity]) -> Result<ClusterMetric> {
        Ok(ResourceMetric::with_series(single(ids)?.clone(), self.signal.metric_type(), raw.series))
    }
}

pub struct ClusterMetrics {
    ctx: AggregatorContext,
    sources: Vec<DynSource<ClusterMetric>>,
}

impl ClusterMetrics {
    pub fn new(ctx: AggregatorContext, client: Arc<dyn PrometheusClient>) -> Self {
        let sources = [Signal::Cpu, Signal::Memory]
            .into_iter()
            .map(|signal| {
                Arc::new(ClusterSource {
                    name: format!("cluster_{}", signal.name()),
                    signal,
                    client: Arc::clone(&client),
                    metadata: Arc::clone(&ctx.metadata),
                }) as DynSource<ClusterMetric>
            })
            .collect();
        Self { ctx, sources }
    }
}

#[async_trait]
impl MetricsDao<ClusterMetric> for ClusterMetrics {
    async fn list_metrics(&self, req: &ListMetricsRequest) -> Result<MetricMap<ClusterMetric>> {
        let _timer = self.ctx.stats.request_timer(KIND);
        let ids = self.ctx.metadata.list_clusters(&req.object_metas).await?;
        self.ctx.aggregate(KIND, ids, &self.sources, &req.condition).await
    }

    async fn create_metrics(&self, _metrics: MetricMap<ClusterMetric>) -> Result<()> {
        Err(unsupported_write(KIND))
    }
}
