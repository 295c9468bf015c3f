//! Sampling-store metric names and the expressions built on them.

use crate::metric::MetricType;
use crate::query::promql::{self, Selector};
use crate::query::{Filter, QueryCondition};
use crate::Result;

pub const NODE_CPU_CORES: &str = "node:node_num_cpu:sum";
pub const NODE_CPU_UTILISATION: &str = "node:node_cpu_utilisation:avg1m";
pub const NODE_MEMORY_TOTAL: &str = "node:node_memory_bytes_total:sum";
pub const NODE_MEMORY_UTILISATION: &str = "node:node_memory_utilisation:";
pub const CONTAINER_CPU: &str = "namespace_pod_name_container_name:container_cpu_usage_seconds_total:sum_rate";
pub const CONTAINER_MEMORY: &str = "container_memory_usage_bytes";

pub const LABEL_NODE: &str = "node";
pub const LABEL_NAMESPACE: &str = "namespace";
pub const LABEL_POD: &str = "pod_name";
pub const LABEL_CONTAINER: &str = "container_name";

/// Physical signal fetched by one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Cpu,
    Memory,
}

impl Signal {
    pub fn metric_type(&self) -> MetricType {
        match self {
            Signal::Cpu => MetricType::CpuUsageSecondsPercentage,
            Signal::Memory => MetricType::MemoryUsageBytes,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Signal::Cpu => "cpu",
            Signal::Memory => "memory",
        }
    }

    /// CPU is reported in millicores.
    pub fn scale(&self, expr: String) -> String {
        match self {
            Signal::Cpu => format!("1000 * {}", expr),
            Signal::Memory => expr,
        }
    }
}

pub fn node_filter<'a>(names: impl IntoIterator<Item = &'a str>) -> Filter {
    Filter::new().any_of(LABEL_NODE, names)
}

/// Per-node usage: capacity times utilisation, each wrapped over time.
pub fn node_usage(signal: Signal, filter: &Filter, condition: &QueryCondition) -> Result<String> {
    let (capacity, utilisation) = match signal {
        Signal::Cpu => (NODE_CPU_CORES, NODE_CPU_UTILISATION),
        Signal::Memory => (NODE_MEMORY_TOTAL, NODE_MEMORY_UTILISATION),
    };
    let capacity = Selector::new(capacity).filter(filter.clone()).build(condition)?;
    let utilisation = Selector::new(utilisation).filter(filter.clone()).build(condition)?;
    Ok(format!("{} * {}", capacity, utilisation))
}

/// Container series, excluding pause containers and pod-level aggregates.
pub fn container_filter() -> Filter {
    Filter::new().ne(LABEL_POD, "").ne(LABEL_CONTAINER, "POD")
}

pub fn container_usage(signal: Signal, filter: Filter, condition: &QueryCondition) -> Result<String> {
    let metric = match signal {
        Signal::Cpu => CONTAINER_CPU,
        Signal::Memory => CONTAINER_MEMORY,
    };
    Selector::new(metric).filter(filter).build(condition)
}

/// Sum of the containers of `pods` in `namespace`.
pub fn pods_usage_sum<'a>(
    signal: Signal,
    namespace: &str,
    pods: impl IntoIterator<Item = &'a str>,
    condition: &QueryCondition,
) -> Result<String> {
    let filter = container_filter().eq(LABEL_NAMESPACE, namespace).any_of(LABEL_POD, pods);
    Ok(signal.scale(promql::sum(&container_usage(signal, filter, condition)?)))
}
