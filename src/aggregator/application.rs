use std::sync::Arc;

use async_trait::async_trait;

use super::signals::{self, Signal};
use super::{single, unsupported_write, AggregatorContext, ListMetricsRequest, MetricsDao};
use crate::backend::{LabeledSeries, PrometheusClient};
use crate::collector::{per_identity, DynSource, MetricSource};
use crate::metadata::MetadataDao;
use crate::metric::{retain_tenant, ApplicationIdentity, MetricMap, ResourceMetric};
use crate::query::QueryCondition;
use crate::Result;

pub type ApplicationMetric = ResourceMetric<ApplicationIdentity>;

const KIND: &str = "application";

/// Sum of one signal over the pods that make up an application.
struct ApplicationSource {
    name: String,
    signal: Signal,
    client: Arc<dyn PrometheusClient>,
    metadata: Arc<dyn MetadataDao>,
}

#[async_trait]
impl MetricSource<ApplicationMetric> for ApplicationSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn partition(&self, ids: &[ApplicationIdentity]) -> Vec<Vec<ApplicationIdentity>> {
        per_identity(ids)
    }

    async fn fetch(&self, ids: &[ApplicationIdentity], condition: &QueryCondition) -> Result<Vec<LabeledSeries>> {
        let app = single(ids)?;
        let pods = retain_tenant(self.metadata.list_pods_by_application(app).await?, &app.cluster);
        if pods.is_empty() {
            return Ok(Vec::new());
        }

        let expr = signals::pods_usage_sum(
            self.signal,
            &app.namespace,
            pods.iter().map(|p| p.name.as_str()),
            condition,
        )?;
        self.client.query_range(&expr, condition).await
    }

    fn convert(&self, raw: LabeledSeries, ids: &[ApplicationIdentity]) -> Result<ApplicationMetric> {
        Ok(ResourceMetric::with_series(single(ids)?.clone(), self.signal.metric_type(), raw.series))
    }
}

pub struct ApplicationMetrics {
    ctx: AggregatorContext,
    sources: Vec<DynSource<ApplicationMetric>>,
}

impl ApplicationMetrics {
    pub fn new(ctx: AggregatorContext, client: Arc<dyn PrometheusClient>) -> Self {
        let sources = [Signal::Cpu, Signal::Memory]
            .into_iter()
            .map(|signal| {
                Arc::new(ApplicationSource {
                    name: format!("application_{}", signal.name()),
                    signal,
                    client: Arc::clone(&client),
                    metadata: Arc::clone(&ctx.metadata),
                }) as DynSource<ApplicationMetric>
            })
            .collect();
        Self { ctx, sources }
    }
}

#[async_trait]
impl MetricsDao<ApplicationMetric> for ApplicationMetrics {
    async fn list_metrics(&self, req: &ListMetricsRequest) -> Result<MetricMap<ApplicationMetric>> {
        let _timer = self.ctx.stats.request_timer(KIND);
        let ids = self.ctx.metadata.list_applications(&req.object_metas).await?;
        self.ctx.aggregate(KIND, ids, &self.sources, &req.condition).await
    }

    async fn create_metrics(&self, _metrics: MetricMap<ApplicationMetric>) -> Result<()> {
        Err(unsupported_write(KIND))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::testing::{context, series, values};
    use crate::backend::prometheus::MockPrometheusClient;
    use crate::metadata::MockMetadataDao;
    use crate::metric::{MetricType, PodIdentity};
    use crate::DatahubError;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_sum_over_application_pods() {
        let mut prom = MockPrometheusClient::new();
        prom.expect_query_range().times(2).returning(|expr, _| {
            assert!(expr.contains("namespace=\"shop\",pod_name=~\"web1|web2\""));
            let value = if expr.starts_with("1000 * ") { 120.0 } else { 512.0 };
            Ok(vec![series(&[], &[(0, value)])])
        });

        let app = ApplicationIdentity::new("shop", "web", "A");
        let mut metadata = MockMetadataDao::new();
        let listed = app.clone();
        metadata.expect_list_applications().returning(move |_| Ok(vec![listed.clone()]));
        metadata.expect_list_pods_by_application().returning(|app| {
            Ok(vec![
                PodIdentity::new(&app.namespace, "web1", &app.cluster),
                PodIdentity::new(&app.namespace, "web2", &app.cluster),
            ])
        });

        let dao = ApplicationMetrics::new(context(metadata, "A"), Arc::new(prom));
        let map = dao.list_metrics(&ListMetricsRequest::default()).await.unwrap();

        let entry = map.get(&app).unwrap();
        assert_eq!(values(entry.series(MetricType::CpuUsageSecondsPercentage)), vec![120.0]);
        assert_eq!(values(entry.series(MetricType::MemoryUsageBytes)), vec![512.0]);
    }

    #[tokio::test]
    async fn test_pods_of_other_clusters_are_dropped() {
        let mut prom = MockPrometheusClient::new();
        prom.expect_query_range().times(2).returning(|expr, _| {
            assert!(expr.contains("pod_name=~\"web1\""), "{}", expr);
            Ok(vec![series(&[], &[(0, 1.0)])])
        });

        let app = ApplicationIdentity::new("shop", "web", "A");
        let mut metadata = MockMetadataDao::new();
        let listed = app.clone();
        metadata.expect_list_applications().returning(move |_| Ok(vec![listed.clone()]));
        metadata.expect_list_pods_by_application().returning(|app| {
            Ok(vec![
                PodIdentity::new(&app.namespace, "web1", &app.cluster),
                PodIdentity::new(&app.namespace, "web7", "B"),
            ])
        });

        let dao = ApplicationMetrics::new(context(metadata, "A"), Arc::new(prom));
        let map = dao.list_metrics(&ListMetricsRequest::default()).await.unwrap();
        assert!(map.get(&app).is_some());
    }

    #[tokio::test]
    async fn test_metadata_error_propagates() {
        let mut metadata = MockMetadataDao::new();
        metadata
            .expect_list_applications()
            .returning(|_| Ok(vec![ApplicationIdentity::new("shop", "web", "A")]));
        metadata
            .expect_list_pods_by_application()
            .returning(|_| Err(DatahubError::Metadata("inventory unavailable".to_string())));

        let dao = ApplicationMetrics::new(context(metadata, "A"), Arc::new(MockPrometheusClient::new()));
        let err = dao.list_metrics(&ListMetricsRequest::default()).await.unwrap_err();

        assert!(matches!(&err, DatahubError::Fetch { target, .. } if target == "shop/web"));
        assert!(matches!(err.root_cause(), DatahubError::Metadata(_)));
    }
}
