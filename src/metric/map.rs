use std::collections::btree_map::{self, BTreeMap};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::identity::{ContainerIdentity, Identity, PodIdentity};
use super::types::{MetricSeries, MetricType};
use crate::query::Order;

/// One value of a Canonical Metric Map: everything known about one identity.
pub trait MetricEntry: Send + 'static {
    type Key: Identity;

    fn key(&self) -> &Self::Key;

    /// Entry with no series, used to fill in identities no source reported.
    fn empty(key: Self::Key) -> Self;

    /// Folds `other` into `self`. Same-typed series are appended, never replaced.
    fn merge(&mut self, other: Self);

    fn sort_by_timestamp(&mut self, order: Order);

    fn limit(&mut self, n: usize);
}

/// Identity-keyed map of metric entries. An identity appears at most once.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricMap<E: MetricEntry> {
    entries: BTreeMap<E::Key, E>,
}

impl<E: MetricEntry> Default for MetricMap<E> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<E: MetricEntry> MetricMap<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, entry: E) {
        match self.entries.entry(entry.key().clone()) {
            btree_map::Entry::Occupied(mut slot) => slot.get_mut().merge(entry),
            btree_map::Entry::Vacant(slot) => {
                slot.insert(entry);
            }
        }
    }

    pub fn merge(&mut self, other: MetricMap<E>) {
        for entry in other.entries.into_values() {
            self.add(entry);
        }
    }

    /// Inserts an empty entry for `key` unless one is present.
    pub fn ensure(&mut self, key: E::Key) {
        self.entries.entry(key.clone()).or_insert_with(|| E::empty(key));
    }

    pub fn sort_by_timestamp(&mut self, order: Order) {
        if order == Order::Unordered {
            return;
        }
        for entry in self.entries.values_mut() {
            entry.sort_by_timestamp(order);
        }
    }

    pub fn limit(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        for entry in self.entries.values_mut() {
            entry.limit(n);
        }
    }

    pub fn get(&self, key: &E::Key) -> Option<&E> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &E::Key) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &E::Key> {
        self.entries.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &E> {
        self.entries.values()
    }

    pub fn into_values(self) -> impl Iterator<Item = E> {
        self.entries.into_values()
    }
}

impl<E: MetricEntry> FromIterator<E> for MetricMap<E> {
    fn from_iter<T: IntoIterator<Item = E>>(iter: T) -> Self {
        let mut map = Self::new();
        for entry in iter {
            map.add(entry);
        }
        map
    }
}

impl<E: MetricEntry + Serialize> Serialize for MetricMap<E> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.entries.values())
    }
}

impl<'de, E: MetricEntry + Deserialize<'de>> Deserialize<'de> for MetricMap<E> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let entries = Vec::<E>::deserialize(deserializer)?;
        Ok(entries.into_iter().collect())
    }
}

/// Metric series of one flat resource (node, namespace, controller, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetric<K> {
    pub identity: K,
    #[serde(default)]
    pub metrics: BTreeMap<MetricType, MetricSeries>,
}

impl<K: Identity> ResourceMetric<K> {
    pub fn new(identity: K) -> Self {
        Self {
            identity,
            metrics: BTreeMap::new(),
        }
    }

    pub fn with_series(identity: K, metric_type: MetricType, series: MetricSeries) -> Self {
        let mut metric = Self::new(identity);
        metric.metrics.insert(metric_type, series);
        metric
    }

    pub fn series(&self, metric_type: MetricType) -> Option<&MetricSeries> {
        self.metrics.get(&metric_type)
    }
}

impl<K: Identity> MetricEntry for ResourceMetric<K> {
    type Key = K;

    fn key(&self) -> &K {
        &self.identity
    }

    fn empty(key: K) -> Self {
        Self::new(key)
    }

    fn merge(&mut self, other: Self) {
        for (metric_type, series) in other.metrics {
            self.metrics.entry(metric_type).or_default().append(series);
        }
    }

    fn sort_by_timestamp(&mut self, order: Order) {
        self.metrics.values_mut().for_each(|s| s.sort_by_timestamp(order));
    }

    fn limit(&mut self, n: usize) {
        self.metrics.values_mut().for_each(|s| s.limit(n));
    }
}

pub type ContainerMetric = ResourceMetric<ContainerIdentity>;

/// Pod metrics are the composition of their containers' metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodMetric {
    pub identity: PodIdentity,
    #[serde(default)]
    pub containers: MetricMap<ContainerMetric>,
}

impl PodMetric {
    pub fn new(identity: PodIdentity) -> Self {
        Self {
            identity,
            containers: MetricMap::new(),
        }
    }
}

impl From<ContainerMetric> for PodMetric {
    fn from(container: ContainerMetric) -> Self {
        let mut pod = PodMetric::new(container.identity.pod.clone());
        pod.containers.add(container);
        pod
    }
}

impl MetricEntry for PodMetric {
    type Key = PodIdentity;

    fn key(&self) -> &PodIdentity {
        &self.identity
    }

    fn empty(key: PodIdentity) -> Self {
        Self::new(key)
    }

    fn merge(&mut self, other: Self) {
        self.containers.merge(other.containers);
    }

    fn sort_by_timestamp(&mut self, order: Order) {
        self.containers.sort_by_timestamp(order);
    }

    fn limit(&mut self, n: usize) {
        self.containers.limit(n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::identity::NodeIdentity;
    use crate::metric::types::Sample;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn series(points: &[(i64, f64)]) -> MetricSeries {
        points
            .iter()
            .map(|(t, v)| Sample::new(Utc.timestamp_opt(*t, 0).unwrap(), *v))
            .collect()
    }

    fn node(name: &str) -> NodeIdentity {
        NodeIdentity::new(name, "c1")
    }

    #[test]
    fn test_add_is_commutative_for_disjoint_types() {
        let cpu = ResourceMetric::with_series(node("n1"), MetricType::CpuUsageSecondsPercentage, series(&[(0, 10.0)]));
        let mem = ResourceMetric::with_series(node("n1"), MetricType::MemoryUsageBytes, series(&[(0, 200.0)]));

        let mut ab = MetricMap::new();
        ab.add(cpu.clone());
        ab.add(mem.clone());

        let mut ba = MetricMap::new();
        ba.add(mem);
        ba.add(cpu);

        assert_eq!(ab, ba);
        assert_eq!(ab.len(), 1);
        assert_eq!(ab.get(&node("n1")).unwrap().metrics.len(), 2);
    }

    #[test]
    fn test_same_type_series_are_appended() {
        let mut map = MetricMap::new();
        map.add(ResourceMetric::with_series(node("n1"), MetricType::MemoryUsageBytes, series(&[(0, 1.0)])));
        map.add(ResourceMetric::with_series(node("n1"), MetricType::MemoryUsageBytes, series(&[(30, 2.0)])));

        let got = map.get(&node("n1")).unwrap().series(MetricType::MemoryUsageBytes).unwrap();
        assert_eq!(got, &series(&[(0, 1.0), (30, 2.0)]));
    }

    #[test]
    fn test_merge_maps() {
        let mut left: MetricMap<ResourceMetric<NodeIdentity>> = MetricMap::new();
        left.add(ResourceMetric::with_series(node("n1"), MetricType::MemoryUsageBytes, series(&[(0, 1.0)])));

        let mut right = MetricMap::new();
        right.add(ResourceMetric::with_series(node("n1"), MetricType::MemoryUsageBytes, series(&[(30, 2.0)])));
        right.add(ResourceMetric::new(node("n2")));

        left.merge(right);
        assert_eq!(left.len(), 2);
        assert_eq!(left.get(&node("n1")).unwrap().series(MetricType::MemoryUsageBytes).unwrap().len(), 2);
    }

    #[test]
    fn test_sort_then_limit_every_series() {
        let mut map = MetricMap::new();
        map.add(ResourceMetric::with_series(
            node("n1"),
            MetricType::CpuUsageSecondsPercentage,
            series(&[(1, 1.0), (3, 3.0), (2, 2.0)]),
        ));
        map.add(ResourceMetric::with_series(node("n1"), MetricType::MemoryUsageBytes, series(&[(5, 5.0)])));

        map.sort_by_timestamp(Order::Desc);
        map.limit(2);

        let entry = map.get(&node("n1")).unwrap();
        assert_eq!(entry.series(MetricType::CpuUsageSecondsPercentage).unwrap(), &series(&[(3, 3.0), (2, 2.0)]));
        assert_eq!(entry.series(MetricType::MemoryUsageBytes).unwrap(), &series(&[(5, 5.0)]));
    }

    #[test]
    fn test_ensure_does_not_overwrite() {
        let mut map = MetricMap::new();
        map.add(ResourceMetric::with_series(node("n1"), MetricType::MemoryUsageBytes, series(&[(0, 1.0)])));
        map.ensure(node("n1"));
        map.ensure(node("n2"));

        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&node("n1")).unwrap().metrics.len(), 1);
        assert!(map.get(&node("n2")).unwrap().metrics.is_empty());
    }

    #[test]
    fn test_pod_built_from_containers() {
        let pod = PodIdentity::new("ns", "pod1", "c1");
        let container = |name: &str| ContainerIdentity {
            pod: pod.clone(),
            name: name.to_string(),
        };

        let mut map: MetricMap<PodMetric> = MetricMap::new();
        map.add(PodMetric::from(ResourceMetric::with_series(
            container("app"),
            MetricType::CpuUsageSecondsPercentage,
            series(&[(0, 10.0)]),
        )));
        map.add(PodMetric::from(ResourceMetric::with_series(
            container("sidecar"),
            MetricType::CpuUsageSecondsPercentage,
            series(&[(0, 1.0)]),
        )));
        map.add(PodMetric::from(ResourceMetric::with_series(
            container("app"),
            MetricType::MemoryUsageBytes,
            series(&[(0, 200.0)]),
        )));

        assert_eq!(map.len(), 1);
        let entry = map.get(&pod).unwrap();
        assert_eq!(entry.containers.len(), 2);
        assert_eq!(entry.containers.get(&container("app")).unwrap().metrics.len(), 2);
    }

    #[test]
    fn test_serializes_as_sorted_entries() {
        let mut map = MetricMap::new();
        map.add(ResourceMetric::with_series(node("n2"), MetricType::MemoryUsageBytes, series(&[(0, 200.0)])));
        map.add(ResourceMetric::new(node("n1")));

        let json = serde_json::to_value(&map).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                {"identity": {"name": "n1", "cluster_name": "c1"}, "metrics": {}},
                {
                    "identity": {"name": "n2", "cluster_name": "c1"},
                    "metrics": {"memory_usage_bytes": [{"time": "1970-01-01T00:00:00Z", "value": "200"}]}
                }
            ])
        );

        let back: MetricMap<ResourceMetric<NodeIdentity>> = serde_json::from_value(json).unwrap();
        assert_eq!(back, map);
    }
}
