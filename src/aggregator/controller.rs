use std::sync::Arc;

use async_trait::async_trait;

use super::signals::{self, Signal, LABEL_NAMESPACE, LABEL_POD};
use super::{single, unsupported_write, AggregatorContext, ListMetricsRequest, MetricsDao, PromSource};
use crate::backend::{LabeledSeries, PrometheusClient};
use crate::collector::{per_identity, DynSource};
use crate::metric::{ControllerIdentity, MetricMap, MetricType, ResourceMetric};
use crate::query::{promql, QueryCondition};
use crate::Result;

pub type ControllerMetric = ResourceMetric<ControllerIdentity>;

const KIND: &str = "controller";

/// Controller usage summed over the pods whose names its kind generates.
pub struct ControllerMetrics {
    ctx: AggregatorContext,
    sources: Vec<DynSource<ControllerMetric>>,
}

impl ControllerMetrics {
    pub fn new(ctx: AggregatorContext, client: Arc<dyn PrometheusClient>) -> Self {
        let sources = [Signal::Cpu, Signal::Memory]
            .into_iter()
            .map(|signal| {
                Arc::new(PromSource::<ControllerMetric> {
                    name: format!("controller_{}", signal.name()),
                    signal,
                    client: Arc::clone(&client),
                    partition: per_identity,
                    expr,
                    convert,
                }) as DynSource<ControllerMetric>
            })
            .collect();
        Self { ctx, sources }
    }
}

fn expr(signal: Signal, ids: &[ControllerIdentity], condition: &QueryCondition) -> Result<String> {
    let controller = single(ids)?;
    let filter = signals::container_filter()
        .eq(LABEL_NAMESPACE, &controller.namespace)
        .matches(LABEL_POD, &controller.kind.pod_name_pattern(&controller.name));
    let usage = signals::container_usage(signal, filter, condition)?;
    Ok(signal.scale(promql::sum(&usage)))
}

fn convert(raw: LabeledSeries, metric_type: MetricType, ids: &[ControllerIdentity]) -> Result<ControllerMetric> {
    Ok(ResourceMetric::with_series(single(ids)?.clone(), metric_type, raw.series))
}

#[async_trait]
impl MetricsDao<ControllerMetric> for ControllerMetrics {
    async fn list_metrics(&self, req: &ListMetricsRequest) -> Result<MetricMap<ControllerMetric>> {
        let _timer = self.ctx.stats.request_timer(KIND);
        let mut ids = self.ctx.metadata.list_controllers(&req.object_metas, req.kind).await?;
        if let Some(kind) = req.kind {
            ids.retain(|id| id.kind == kind);
        }
        self.ctx.aggregate(KIND, ids, &self.sources, &req.condition).await
    }

    async fn create_metrics(&self, _metrics: MetricMap<ControllerMetric>) -> Result<()> {
        Err(unsupported_write(KIND))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::testing::{context, series, values};
    use crate::backend::prometheus::MockPrometheusClient;
    use crate::metadata::MockMetadataDao;
    use crate::metric::ControllerKind;
    use crate::query::AggregateFunction;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn controllers() -> Vec<ControllerIdentity> {
        vec![
            ControllerIdentity::new("ns", "web", ControllerKind::Deployment, "A"),
            ControllerIdentity::new("ns", "db", ControllerKind::StatefulSet, "A"),
        ]
    }

    #[test]
    fn test_expression() {
        let cond = QueryCondition {
            step: Some(Duration::from_secs(30)),
            aggregate: AggregateFunction::Max,
            ..Default::default()
        };
        let expr = expr(Signal::Memory, &controllers()[1..], &cond).unwrap();
        assert_eq!(
            expr,
            "sum(max_over_time(container_memory_usage_bytes\
             {pod_name!=\"\",container_name!=\"POD\",namespace=\"ns\",pod_name=~\"db-[0-9]+\"}[30s]))"
        );
    }

    #[tokio::test]
    async fn test_one_query_per_controller() {
        let mut prom = MockPrometheusClient::new();
        prom.expect_query_range().times(4).returning(|expr, _| {
            let value = if expr.contains("web-") { 5.0 } else { 7.0 };
            Ok(vec![series(&[], &[(0, value)])])
        });

        let mut metadata = MockMetadataDao::new();
        metadata.expect_list_controllers().returning(|_, _| Ok(controllers()));

        let dao = ControllerMetrics::new(context(metadata, "A"), Arc::new(prom));
        let map = dao.list_metrics(&ListMetricsRequest::default()).await.unwrap();

        let web = map.get(&controllers()[0]).unwrap();
        assert_eq!(values(web.series(MetricType::CpuUsageSecondsPercentage)), vec![5.0]);
        let db = map.get(&controllers()[1]).unwrap();
        assert_eq!(values(db.series(MetricType::MemoryUsageBytes)), vec![7.0]);
    }

    #[tokio::test]
    async fn test_kind_filter() {
        let mut prom = MockPrometheusClient::new();
        prom.expect_query_range().times(2).returning(|expr, _| {
            assert!(expr.contains("db-[0-9]+"));
            Ok(vec![])
        });

        // The DAO ignores the kind here; the aggregator still drops the others.
        let mut metadata = MockMetadataDao::new();
        metadata.expect_list_controllers().returning(|_, _| Ok(controllers()));

        let dao = ControllerMetrics::new(context(metadata, "A"), Arc::new(prom));
        let req = ListMetricsRequest {
            kind: Some(ControllerKind::StatefulSet),
            ..Default::default()
        };
        let map = dao.list_metrics(&req).await.unwrap();

        assert_eq!(map.keys().cloned().collect::<Vec<_>>(), vec![controllers()[1].clone()]);
    }
}
