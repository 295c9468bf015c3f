use std::sync::Arc;

use async_trait::async_trait;

use super::signals::{self, Signal, LABEL_NODE};
use super::{find, unsupported_write, whole_batch, AggregatorContext, ListMetricsRequest, MetricsDao, PromSource};
use crate::backend::{LabeledSeries, PrometheusClient};
use crate::collector::DynSource;
use crate::metric::{MetricMap, MetricType, NodeIdentity, ResourceMetric};
use crate::query::QueryCondition;
use crate::Result;

pub type NodeMetric = ResourceMetric<NodeIdentity>;

const KIND: &str = "node";

/// Node usage from the sampling store, all requested nodes in one query per signal.
pub struct NodeMetrics {
    ctx: AggregatorContext,
    sources: Vec<DynSource<NodeMetric>>,
}

impl NodeMetrics {
    pub fn new(ctx: AggregatorContext, client: Arc<dyn PrometheusClient>) -> Self {
        let sources = [Signal::Cpu, Signal::Memory]
            .into_iter()
            .map(|signal| {
                Arc::new(PromSource::<NodeMetric> {
                    name: format!("node_{}", signal.name()),
                    signal,
                    client: Arc::clone(&client),
                    partition: whole_batch,
                    expr,
                    convert,
                }) as DynSource<NodeMetric>
            })
            .collect();
        Self { ctx, sources }
    }
}

fn expr(signal: Signal, ids: &[NodeIdentity], condition: &QueryCondition) -> Result<String> {
    let filter = signals::node_filter(ids.iter().map(|id| id.name.as_str()));
    Ok(signal.scale(signals::node_usage(signal, &filter, condition)?))
}

fn convert(raw: LabeledSeries, metric_type: MetricType, ids: &[NodeIdentity]) -> Result<NodeMetric> {
    let name = raw.label(LABEL_NODE)?;
    let id = find(ids, name, |id| id.name == name)?;
    Ok(ResourceMetric::with_series(id.clone(), metric_type, raw.series))
}

#[async_trait]
impl MetricsDao<NodeMetric> for NodeMetrics {
    async fn list_metrics(&self, req: &ListMetricsRequest) -> Result<MetricMap<NodeMetric>> {
        let _timer = self.ctx.stats.request_timer(KIND);
        let ids = self.ctx.metadata.list_nodes(&req.object_metas).await?;
        self.ctx.aggregate(KIND, ids, &self.sources, &req.condition).await
    }

    async fn create_metrics(&self, _metrics: MetricMap<NodeMetric>) -> Result<()> {
        Err(unsupported_write(KIND))
    }
}
