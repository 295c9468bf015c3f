use std::sync::Arc;

use async_trait::async_trait;
use slog::{debug, warn};

use super::signals::Signal;
use super::{find, whole_batch, AggregatorContext, ListMetricsRequest, MetricsDao, NodeMetric};
use crate::backend::{InfluxClient, LabeledSeries, Point};
use crate::collector::{DynSource, MetricSource};
use crate::metric::{MetricMap, MetricType, NodeIdentity, ResourceMetric};
use crate::query::condition::DEFAULT_STEP;
use crate::query::influxql::Statement;
use crate::query::{Filter, QueryCondition};
use crate::Result;

const KIND: &str = "node";

pub const MEASUREMENT_NODE_CPU: &str = "node_cpu";
pub const MEASUREMENT_NODE_MEMORY: &str = "node_memory";

const TAG_NAME: &str = "name";
const TAG_CLUSTER: &str = "cluster_name";
const TAG_UID: &str = "uid";
const FIELD_VALUE: &str = "value";

fn measurement(signal: Signal) -> &'static str {
    match signal {
        Signal::Cpu => MEASUREMENT_NODE_CPU,
        Signal::Memory => MEASUREMENT_NODE_MEMORY,
    }
}

fn measurement_of(metric_type: MetricType) -> &'static str {
    match metric_type {
        MetricType::CpuUsageSecondsPercentage => MEASUREMENT_NODE_CPU,
        MetricType::MemoryUsageBytes => MEASUREMENT_NODE_MEMORY,
    }
}

struct InfluxNodeSource {
    signal: Signal,
    client: Arc<dyn InfluxClient>,
}

impl InfluxNodeSource {
    /// Raw points at the stored resolution unless a coarser step was asked for.
    fn statement(&self, ids: &[NodeIdentity], condition: &QueryCondition) -> String {
        let filter = Filter::new().any_group(
            ids.iter()
                .map(|id| vec![(TAG_NAME, id.name.as_str()), (TAG_CLUSTER, id.cluster.as_str())])
                .collect(),
        );
        let stmt = Statement::new(measurement(self.signal), condition)
            .select(&[FIELD_VALUE])
            .filter(filter)
            .group_by(&[TAG_NAME, TAG_CLUSTER, TAG_UID]);

        match condition.step_secs() {
            Some(step) if step != DEFAULT_STEP.as_secs() => stmt.aggregate_over_time().build(),
            _ => stmt.build(),
        }
    }
}

#[async_trait]
impl MetricSource<NodeMetric> for InfluxNodeSource {
    fn name(&self) -> &str {
        measurement(self.signal)
    }

    fn partition(&self, ids: &[NodeIdentity]) -> Vec<Vec<NodeIdentity>> {
        whole_batch(ids)
    }

    async fn fetch(&self, ids: &[NodeIdentity], condition: &QueryCondition) -> Result<Vec<LabeledSeries>> {
        self.client.query(&self.statement(ids, condition), condition).await
    }

    fn convert(&self, raw: LabeledSeries, ids: &[NodeIdentity]) -> Result<NodeMetric> {
        let name = raw.label(TAG_NAME)?;
        let cluster = raw.label_or_empty(TAG_CLUSTER);
        let id = find(ids, name, |id| id.name == name && (cluster.is_empty() || id.cluster == cluster))?;
        Ok(ResourceMetric::with_series(id.clone(), self.signal.metric_type(), raw.series))
    }
}

/// Node metrics kept in the column store, which also accepts writes.
pub struct InfluxNodeMetrics {
    ctx: AggregatorContext,
    client: Arc<dyn InfluxClient>,
    sources: Vec<DynSource<NodeMetric>>,
}

impl InfluxNodeMetrics {
    pub fn new(ctx: AggregatorContext, client: Arc<dyn InfluxClient>) -> Self {
        let sources = [Signal::Cpu, Signal::Memory]
            .into_iter()
            .map(|signal| {
                Arc::new(InfluxNodeSource {
                    signal,
                    client: Arc::clone(&client),
                }) as DynSource<NodeMetric>
            })
            .collect();
        Self { ctx, client, sources }
    }
}

#[async_trait]
impl MetricsDao<NodeMetric> for InfluxNodeMetrics {
    async fn list_metrics(&self, req: &ListMetricsRequest) -> Result<MetricMap<NodeMetric>> {
        let _timer = self.ctx.stats.request_timer(KIND);
        let ids = self.ctx.metadata.list_nodes(&req.object_metas).await?;
        self.ctx.aggregate(KIND, ids, &self.sources, &req.condition).await
    }

    /// Writes every sample as one point. Entries of other clusters are dropped.
    async fn create_metrics(&self, metrics: MetricMap<NodeMetric>) -> Result<()> {
        let mut points = Vec::new();
        for entry in metrics.values() {
            if entry.identity.cluster != self.ctx.cluster_uid {
                warn!(self.ctx.logger, "dropping write for foreign cluster"; "node" => %entry.identity, "cluster" => &entry.identity.cluster);
                continue;
            }

            for (metric_type, series) in &entry.metrics {
                let measurement = measurement_of(*metric_type);
                points.extend(series.samples().iter().map(|sample| {
                    Point::new(measurement, sample.time)
                        .tag(TAG_NAME, &entry.identity.name)
                        .tag(TAG_CLUSTER, &entry.identity.cluster)
                        .field(FIELD_VALUE, sample.value)
                }));
            }
        }

        debug!(self.ctx.logger, "writing node metrics"; "points" => points.len());
        self.client.write_points(points).await
    }
}
