use super::condition::QueryCondition;
use super::filter::{Filter, Predicate};
use crate::{DatahubError, Result};

/// Instant-vector selector `metric{label matchers}`.
#[derive(Debug, Clone)]
pub struct Selector {
    metric: String,
    filter: Filter,
}

impl Selector {
    pub fn new(metric: &str) -> Self {
        Self {
            metric: metric.to_string(),
            filter: Filter::new(),
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Renders the bare selector.
    pub fn render(&self) -> Result<String> {
        let matchers = self
            .filter
            .predicates()
            .iter()
            .map(render_matcher)
            .collect::<Result<Vec<_>>>()?;

        if matchers.is_empty() {
            Ok(self.metric.clone())
        } else {
            Ok(format!("{}{{{}}}", self.metric, matchers.join(",")))
        }
    }

    /// Renders the selector wrapped by the condition's over-time function.
    pub fn build(&self, condition: &QueryCondition) -> Result<String> {
        Ok(wrap_over_time(&self.render()?, condition))
    }
}

/// `<func>_over_time(expr[<step>s])` when the condition carries both a step
/// and an aggregate function, otherwise `expr` unchanged.
pub fn wrap_over_time(expr: &str, condition: &QueryCondition) -> String {
    match condition.over_time() {
        Some((func, step)) => format!("{}({}[{}s])", func, expr, step),
        None => expr.to_string(),
    }
}

pub fn sum(expr: &str) -> String {
    format!("sum({})", expr)
}

pub fn sum_by(labels: &[&str], expr: &str) -> String {
    format!("sum({}) by ({})", expr, labels.join(","))
}

/// Regex alternation matching any of the literal values.
pub fn alternation<I, S>(values: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    values
        .into_iter()
        .map(|v| regex::escape(v.as_ref()))
        .collect::<Vec<_>>()
        .join("|")
}

fn render_matcher(predicate: &Predicate) -> Result<String> {
    Ok(match predicate {
        Predicate::Eq(key, value) => format!("{}={}", key, quote(value)),
        Predicate::Ne(key, value) => format!("{}!={}", key, quote(value)),
        Predicate::AnyOf(key, values) => format!("{}=~{}", key, quote(&alternation(values))),
        Predicate::Matches(key, pattern) => format!("{}=~{}", key, quote(pattern)),
        Predicate::AnyGroup(_) => {
            return Err(DatahubError::Unsupported(
                "grouped disjunctions cannot be expressed as label matchers".to_string(),
            ))
        }
    })
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::condition::{AggregateFunction, Order};
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    #[test]
    fn test_selector_with_over_time() {
        let cond = QueryCondition {
            start: Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()),
            end: Some(Utc.with_ymd_and_hms(2020, 1, 1, 1, 0, 0).unwrap()),
            step: Some(Duration::from_secs(30)),
            order: Order::Desc,
            limit: 5,
            aggregate: AggregateFunction::Max,
            ..Default::default()
        };
        let expr = Selector::new("node:node_num_cpu:sum")
            .filter(Filter::new().eq("node", "n1"))
            .build(&cond)
            .unwrap();

        assert_eq!(expr, "max_over_time(node:node_num_cpu:sum{node=\"n1\"}[30s])");
    }

    #[test]
    fn test_zero_condition_passes_through() {
        let expr = Selector::new("container_memory_usage_bytes")
            .filter(
                Filter::new()
                    .ne("pod_name", "")
                    .ne("container_name", "POD")
                    .eq("namespace", "default")
                    .any_of("pod_name", ["web1", "web2"]),
            )
            .build(&QueryCondition::default())
            .unwrap();

        assert_eq!(
            expr,
            "container_memory_usage_bytes{pod_name!=\"\",container_name!=\"POD\",namespace=\"default\",pod_name=~\"web1|web2\"}"
        );
    }

    #[test]
    fn test_alternation_escapes_regex() {
        let expr = Selector::new("m")
            .filter(Filter::new().any_of("node", ["node1.local"]))
            .render()
            .unwrap();
        assert_eq!(expr, "m{node=~\"node1\\\\.local\"}");
    }

    #[test]
    fn test_bare_metric() {
        assert_eq!(Selector::new("up").render().unwrap(), "up");
        assert_eq!(sum_by(&["namespace"], "up"), "sum(up) by (namespace)");
        assert_eq!(sum("up"), "sum(up)");
    }

    #[test]
    fn test_any_group_is_rejected() {
        let err = Selector::new("m")
            .filter(Filter::new().any_group(vec![vec![("a", "b")]]))
            .render()
            .unwrap_err();
        assert!(matches!(err, DatahubError::Unsupported(_)));
    }
}
