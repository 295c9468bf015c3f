use std::sync::Arc;

use async_trait::async_trait;

use super::signals::{self, Signal, LABEL_NAMESPACE};
use super::{find, unsupported_write, whole_batch, AggregatorContext, ListMetricsRequest, MetricsDao, PromSource};
use crate::backend::{LabeledSeries, PrometheusClient};
use crate::collector::DynSource;
use crate::metric::{MetricMap, MetricType, NamespaceIdentity, ResourceMetric};
use crate::query::{promql, QueryCondition};
use crate::Result;

pub type NamespaceMetric = ResourceMetric<NamespaceIdentity>;

const KIND: &str = "namespace";

pub struct NamespaceMetrics {
    ctx: AggregatorContext,
    sources: Vec<DynSource<NamespaceMetric>>,
}

impl NamespaceMetrics {
    pub fn new(ctx: AggregatorContext, client: Arc<dyn PrometheusClient>) -> Self {
        let sources = [Signal::Cpu, Signal::Memory]
            .into_iter()
            .map(|signal| {
                Arc::new(PromSource::<NamespaceMetric> {
                    name: format!("namespace_{}", signal.name()),
                    signal,
                    client: Arc::clone(&client),
                    partition: whole_batch,
                    expr,
                    convert,
                }) as DynSource<NamespaceMetric>
            })
            .collect();
        Self { ctx, sources }
    }
}

fn expr(signal: Signal, ids: &[NamespaceIdentity], condition: &QueryCondition) -> Result<String> {
    let filter = signals::container_filter().any_of(LABEL_NAMESPACE, ids.iter().map(|id| id.name.as_str()));
    let usage = signals::container_usage(signal, filter, condition)?;
    Ok(signal.scale(promql::sum_by(&[LABEL_NAMESPACE], &usage)))
}

fn convert(raw: LabeledSeries, metric_type: MetricType, ids: &[NamespaceIdentity]) -> Result<NamespaceMetric> {
    let name = raw.label(LABEL_NAMESPACE)?;
    let id = find(ids, name, |id| id.name == name)?;
    Ok(ResourceMetric::with_series(id.clone(), metric_type, raw.series))
}

#[async_trait]
impl MetricsDao<NamespaceMetric> for NamespaceMetrics {
    async fn list_metrics(&self, req: &ListMetricsRequest) -> Result<MetricMap<NamespaceMetric>> {
        let _timer = self.ctx.stats.request_timer(KIND);
        let ids = self.ctx.metadata.list_namespaces(&req.object_metas).await?;
        self.ctx.aggregate(KIND, ids, &self.sources, &req.condition).await
    }

    async fn create_metrics(&self, _metrics: MetricMap<NamespaceMetric>) -> Result<()> {
        Err(unsupported_write(KIND))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::testing::{context, series, values};
    use crate::backend::prometheus::MockPrometheusClient;
    use crate::metadata::MockMetadataDao;
    use crate::query::Order;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cpu_expr_scales_grouped_sum() {
        let ids = [NamespaceIdentity::new("web", "A")];
        let cpu = expr(Signal::Cpu, &ids, &QueryCondition::default()).unwrap();
        assert!(cpu.starts_with("1000 * sum("), "{}", cpu);
        assert!(cpu.ends_with(") by (namespace)"), "{}", cpu);
        assert!(!cpu.contains("sum by"), "{}", cpu);
    }

    #[tokio::test]
    async fn test_sum_by_namespace() {
        let mut prom = MockPrometheusClient::new();
        prom.expect_query_range().times(2).returning(|expr, _| {
            assert!(expr.ends_with(") by (namespace)"), "{}", expr);
            assert!(expr.contains("namespace=~\"kube|web\""));
            Ok(vec![
                series(&[("namespace", "web")], &[(0, 1.0), (30, 3.0), (60, 2.0)]),
                series(&[("namespace", "other")], &[(0, 1.0)]),
            ])
        });

        let mut metadata = MockMetadataDao::new();
        metadata.expect_list_namespaces().returning(|_| {
            Ok(vec![NamespaceIdentity::new("kube", "A"), NamespaceIdentity::new("web", "A")])
        });

        let dao = NamespaceMetrics::new(context(metadata, "A"), Arc::new(prom));
        let req = ListMetricsRequest {
            condition: QueryCondition {
                order: Order::Desc,
                limit: 2,
                ..Default::default()
            },
            ..Default::default()
        };
        let map = dao.list_metrics(&req).await.unwrap();

        assert_eq!(map.len(), 2);
        let web = map.get(&NamespaceIdentity::new("web", "A")).unwrap();
        assert_eq!(values(web.series(MetricType::MemoryUsageBytes)), vec![2.0, 3.0]);
        assert!(map.get(&NamespaceIdentity::new("kube", "A")).unwrap().metrics.is_empty());
    }
}
