//! Resource-aware aggregators. Each kind resolves its identities, applies
//! the tenant filter and hands the survivors to the [`Collector`] together
//! with one source per physical signal.

pub mod application;
pub mod cluster;
pub mod controller;
pub mod influx_node;
pub mod namespace;
pub mod node;
pub mod pod;
pub mod signals;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use slog::{debug, Logger};

use crate::backend::{LabeledSeries, PrometheusClient};
use crate::collector::{Collector, DynSource, MetricSource};
use crate::metadata::{MetadataDao, ObjectMeta};
use crate::metric::{retain_tenant, MetricEntry, MetricMap, MetricType};
use crate::metrics::Stats;
use crate::query::{QueryCondition, QueryConditionRequest};
use crate::{DatahubError, Result};

pub use self::application::{ApplicationMetric, ApplicationMetrics};
pub use self::cluster::{ClusterMetric, ClusterMetrics};
pub use self::controller::{ControllerMetric, ControllerMetrics};
pub use self::influx_node::InfluxNodeMetrics;
pub use self::namespace::{NamespaceMetric, NamespaceMetrics};
pub use self::node::{NodeMetric, NodeMetrics};
pub use self::pod::PodMetrics;
use self::signals::Signal;

/// Normalized list request shared by every kind.
#[derive(Debug, Clone, Default)]
pub struct ListMetricsRequest {
    pub condition: QueryCondition,
    /// Empty means every resource of the kind.
    pub object_metas: Vec<ObjectMeta>,
    /// Only consulted by controller aggregation.
    pub kind: Option<crate::metric::ControllerKind>,
}

/// List request as it arrives on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ListMetricsPayload {
    pub query_condition: QueryConditionRequest,
    pub object_metas: Vec<ObjectMeta>,
    pub kind: Option<crate::metric::ControllerKind>,
}

impl From<ListMetricsPayload> for ListMetricsRequest {
    fn from(payload: ListMetricsPayload) -> Self {
        Self {
            condition: QueryCondition::from(&payload.query_condition),
            object_metas: payload.object_metas,
            kind: payload.kind,
        }
    }
}

#[async_trait]
pub trait MetricsDao<E: MetricEntry>: Send + Sync {
    async fn list_metrics(&self, req: &ListMetricsRequest) -> Result<MetricMap<E>>;

    async fn create_metrics(&self, metrics: MetricMap<E>) -> Result<()>;
}

/// Everything an aggregator needs besides its backend client.
#[derive(Clone)]
pub struct AggregatorContext {
    pub cluster_uid: String,
    pub collector: Collector,
    pub metadata: Arc<dyn MetadataDao>,
    pub logger: Logger,
    pub stats: Stats,
}

impl AggregatorContext {
    /// Tenant filter, empty short-circuit, collection and fill-in of every
    /// identity that survived the filter.
    pub async fn aggregate<E: MetricEntry>(
        &self,
        kind: &str,
        candidates: Vec<E::Key>,
        sources: &[DynSource<E>],
        condition: &QueryCondition,
    ) -> Result<MetricMap<E>> {
        let resolved = candidates.len();
        let ids = retain_tenant(candidates, &self.cluster_uid);
        if ids.is_empty() {
            debug!(self.logger, "no identities left after tenant filter"; "kind" => kind, "resolved" => resolved);
            return Ok(MetricMap::new());
        }

        let mut map = self.collector.collect(&ids, sources, condition).await?;
        for id in ids {
            map.ensure(id);
        }
        Ok(map)
    }
}

pub(crate) fn unsupported_write(kind: &str) -> DatahubError {
    DatahubError::Unsupported(format!("writing {} metrics to the sampling store", kind))
}

/// The only identity of a single-identity batch.
pub(crate) fn single<K>(ids: &[K]) -> Result<&K> {
    match ids {
        [id] => Ok(id),
        _ => Err(DatahubError::Internal(format!("expected one identity per batch, got {}", ids.len()))),
    }
}

pub(crate) fn find<'a, K>(ids: &'a [K], what: &str, pred: impl Fn(&K) -> bool) -> Result<&'a K> {
    ids.iter()
        .find(|id| pred(id))
        .ok_or_else(|| DatahubError::MalformedResult(format!("series matches no requested identity: {}", what)))
}

/// Sampling-store source whose query depends only on the batch of identities.
pub struct PromSource<E: MetricEntry> {
    pub name: String,
    pub signal: Signal,
    pub client: Arc<dyn PrometheusClient>,
    pub partition: fn(&[E::Key]) -> Vec<Vec<E::Key>>,
    pub expr: fn(Signal, &[E::Key], &QueryCondition) -> Result<String>,
    pub convert: fn(LabeledSeries, MetricType, &[E::Key]) -> Result<E>,
}

#[async_trait]
impl<E: MetricEntry> MetricSource<E> for PromSource<E> {
    fn name(&self) -> &str {
        &self.name
    }

    fn partition(&self, ids: &[E::Key]) -> Vec<Vec<E::Key>> {
        (self.partition)(ids)
    }

    async fn fetch(&self, ids: &[E::Key], condition: &QueryCondition) -> Result<Vec<LabeledSeries>> {
        let expr = (self.expr)(self.signal, ids, condition)?;
        self.client.query_range(&expr, condition).await
    }

    fn convert(&self, raw: LabeledSeries, ids: &[E::Key]) -> Result<E> {
        (self.convert)(raw, self.signal.metric_type(), ids)
    }
}

pub(crate) fn whole_batch<K: Clone>(ids: &[K]) -> Vec<Vec<K>> {
    vec![ids.to_vec()]
}
