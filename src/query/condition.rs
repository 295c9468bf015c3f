use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Step used by range queries when the request does not carry one.
pub const DEFAULT_STEP: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Order {
    /// Keep samples in the order the backend returned them.
    #[default]
    Unordered,
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunction {
    #[default]
    None,
    Max,
    Avg,
}

impl AggregateFunction {
    /// Name of the range-vector function in the sampling store.
    pub fn over_time_name(&self) -> Option<&'static str> {
        match self {
            AggregateFunction::None => None,
            AggregateFunction::Max => Some("max_over_time"),
            AggregateFunction::Avg => Some("avg_over_time"),
        }
    }

    /// Name of the selector/aggregation function in the column store.
    pub fn influx_name(&self) -> Option<&'static str> {
        match self {
            AggregateFunction::None => None,
            AggregateFunction::Max => Some("max"),
            AggregateFunction::Avg => Some("mean"),
        }
    }
}

/// Normalized time-range, ordering, limiting and aggregation parameters of a request.
///
/// Built once per request and shared read-only by every fetch. A zero value
/// means: no time filter, no step, insertion order, no limit, no aggregation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryCondition {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Deadline handed to the backend call.
    pub timeout: Option<Duration>,
    pub step: Option<Duration>,
    pub order: Order,
    /// 0 means unbounded.
    pub limit: usize,
    pub aggregate: AggregateFunction,
}

impl QueryCondition {
    /// Step in whole seconds, if a non-zero step is present.
    pub fn step_secs(&self) -> Option<u64> {
        self.step.map(|s| s.as_secs()).filter(|s| *s > 0)
    }

    pub fn step_or_default(&self) -> Duration {
        match self.step {
            Some(step) if !step.is_zero() => step,
            _ => DEFAULT_STEP,
        }
    }

    /// Aggregation applies only when both a step and a function are present.
    pub fn over_time(&self) -> Option<(&'static str, u64)> {
        let func = self.aggregate.over_time_name()?;
        let step = self.step_secs()?;
        Some((func, step))
    }
}

/// Query condition as it arrives on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConditionRequest {
    pub time_range: Option<TimeRangeRequest>,
    pub order: Order,
    pub limit: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeRangeRequest {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub timeout_secs: Option<u64>,
    pub step_secs: Option<u64>,
    pub aggregate_function: AggregateFunction,
}

impl From<&QueryConditionRequest> for QueryCondition {
    fn from(req: &QueryConditionRequest) -> Self {
        let range = req.time_range.clone().unwrap_or_default();
        QueryCondition {
            start: range.start_time,
            end: range.end_time,
            timeout: range.timeout_secs.map(Duration::from_secs),
            step: range.step_secs.map(Duration::from_secs),
            order: req.order,
            limit: req.limit as usize,
            aggregate: range.aggregate_function,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_over_time_requires_step_and_function() {
        let mut cond = QueryCondition {
            aggregate: AggregateFunction::Max,
            ..Default::default()
        };
        assert_eq!(cond.over_time(), None);

        cond.step = Some(Duration::from_secs(30));
        assert_eq!(cond.over_time(), Some(("max_over_time", 30)));

        cond.aggregate = AggregateFunction::None;
        assert_eq!(cond.over_time(), None);
    }

    #[test]
    fn test_from_wire_request() {
        let req: QueryConditionRequest = serde_json::from_value(serde_json::json!({
            "time_range": {
                "start_time": "2020-01-01T00:00:00Z",
                "step_secs": 60,
                "aggregate_function": "avg"
            },
            "order": "desc",
            "limit": 5
        }))
        .unwrap();

        let cond = QueryCondition::from(&req);
        assert_eq!(cond.start, Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()));
        assert_eq!(cond.end, None);
        assert_eq!(cond.step_secs(), Some(60));
        assert_eq!(cond.order, Order::Desc);
        assert_eq!(cond.limit, 5);
        assert_eq!(cond.aggregate, AggregateFunction::Avg);
    }

    #[test]
    fn test_empty_request_is_zero_condition() {
        let cond = QueryCondition::from(&QueryConditionRequest::default());
        assert_eq!(cond, QueryCondition::default());
        assert_eq!(cond.step_or_default(), DEFAULT_STEP);
    }
}
