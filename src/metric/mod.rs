//! Canonical Metric Map and the types it is built from.

pub mod identity;
pub mod map;
pub mod types;

pub use identity::{
    retain_tenant, ApplicationIdentity, ClusterIdentity, ContainerIdentity, ControllerIdentity, ControllerKind,
    Identity, NamespaceIdentity, NodeIdentity, PodIdentity,
};
pub use map::{ContainerMetric, MetricEntry, MetricMap, PodMetric, ResourceMetric};
pub use types::{MetricSeries, MetricType, Sample};
