use chrono::{DateTime, SecondsFormat, Utc};

use super::condition::{Order, QueryCondition};
use super::filter::{Filter, Predicate};

/// Builds one InfluxQL `SELECT` for a measurement and a query condition.
///
/// Clause layout:
/// `SELECT <fields> FROM "<measurement>" WHERE <tag predicates> AND <time predicates>
///  GROUP BY <tags>,time(<step>s) ORDER BY time <ASC|DESC> LIMIT <n>`;
/// every clause is left out when it has nothing to say.
#[derive(Debug, Clone)]
pub struct Statement<'a> {
    measurement: String,
    condition: &'a QueryCondition,
    fields: Vec<String>,
    filter: Filter,
    group_by_tags: Vec<String>,
    over_time: bool,
}

impl<'a> Statement<'a> {
    pub fn new(measurement: &str, condition: &'a QueryCondition) -> Self {
        Self {
            measurement: measurement.to_string(),
            condition,
            fields: Vec::new(),
            filter: Filter::new(),
            group_by_tags: Vec::new(),
            over_time: false,
        }
    }

    pub fn select(mut self, fields: &[&str]) -> Self {
        self.fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn group_by(mut self, tags: &[&str]) -> Self {
        self.group_by_tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Buckets rows by the condition's step and aggregates the selected fields
    /// with the condition's function. No-op unless both are present.
    pub fn aggregate_over_time(mut self) -> Self {
        self.over_time = true;
        self
    }

    fn bucket(&self) -> Option<(&'static str, u64)> {
        if !self.over_time {
            return None;
        }
        let func = self.condition.aggregate.influx_name()?;
        let step = self.condition.step_secs()?;
        Some((func, step))
    }

    fn fields_clause(&self) -> String {
        if self.fields.is_empty() {
            return "*".to_string();
        }
        match self.bucket() {
            Some((func, _)) => self
                .fields
                .iter()
                .map(|f| format!("{}({}) AS {}", func, quote_ident(f), quote_ident(f)))
                .collect::<Vec<_>>()
                .join(","),
            None => self.fields.iter().map(|f| quote_ident(f)).collect::<Vec<_>>().join(","),
        }
    }

    fn where_clause(&self) -> Option<String> {
        let mut terms: Vec<String> = self.filter.predicates().iter().map(render_predicate).collect();
        if let Some(start) = self.condition.start {
            terms.push(format!("time >= {}", quote_time(start)));
        }
        if let Some(end) = self.condition.end {
            terms.push(format!("time <= {}", quote_time(end)));
        }

        if terms.is_empty() {
            None
        } else {
            Some(format!("WHERE {}", terms.join(" AND ")))
        }
    }

    fn group_by_clause(&self) -> Option<String> {
        let mut keys: Vec<String> = self.group_by_tags.iter().map(|t| quote_ident(t)).collect();
        if let Some((_, step)) = self.bucket() {
            keys.push(format!("time({}s)", step));
        }

        if keys.is_empty() {
            None
        } else {
            Some(format!("GROUP BY {}", keys.join(",")))
        }
    }

    fn order_clause(&self) -> Option<String> {
        match self.condition.order {
            Order::Unordered => None,
            Order::Asc => Some("ORDER BY time ASC".to_string()),
            Order::Desc => Some("ORDER BY time DESC".to_string()),
        }
    }

    fn limit_clause(&self) -> Option<String> {
        (self.condition.limit > 0).then(|| format!("LIMIT {}", self.condition.limit))
    }

    pub fn build(&self) -> String {
        let mut parts = vec![
            format!("SELECT {}", self.fields_clause()),
            format!("FROM {}", quote_ident(&self.measurement)),
        ];
        parts.extend(self.where_clause());
        parts.extend(self.group_by_clause());
        parts.extend(self.order_clause());
        parts.extend(self.limit_clause());
        parts.join(" ")
    }
}

fn render_predicate(predicate: &Predicate) -> String {
    match predicate {
        Predicate::Eq(key, value) => format!("{}={}", quote_ident(key), quote_literal(value)),
        Predicate::Ne(key, value) => format!("{}!={}", quote_ident(key), quote_literal(value)),
        Predicate::AnyOf(key, values) => {
            let alternatives: Vec<String> = values
                .iter()
                .map(|v| format!("{}={}", quote_ident(key), quote_literal(v)))
                .collect();
            format!("({})", alternatives.join(" OR "))
        }
        Predicate::Matches(key, pattern) => {
            format!("{}=~/{}/", quote_ident(key), pattern.replace('/', "\\/"))
        }
        Predicate::AnyGroup(groups) => {
            let groups: Vec<String> = groups
                .iter()
                .map(|group| {
                    let terms: Vec<String> = group
                        .iter()
                        .map(|(k, v)| format!("{}={}", quote_ident(k), quote_literal(v)))
                        .collect();
                    format!("({})", terms.join(" AND "))
                })
                .collect();
            format!("({})", groups.join(" OR "))
        }
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\\\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn quote_time(t: DateTime<Utc>) -> String {
    format!("'{}'", t.to_rfc3339_opts(SecondsFormat::Secs, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::condition::AggregateFunction;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn full_condition() -> QueryCondition {
        QueryCondition {
            start: Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()),
            end: Some(Utc.with_ymd_and_hms(2020, 1, 1, 1, 0, 0).unwrap()),
            step: Some(Duration::from_secs(30)),
            order: Order::Desc,
            limit: 5,
            aggregate: AggregateFunction::Max,
            ..Default::default()
        }
    }

    #[test]
    fn test_full_condition() {
        let cond = full_condition();
        let cmd = Statement::new("node_cpu", &cond)
            .select(&["value"])
            .filter(Filter::new().eq("name", "n1"))
            .group_by(&["name", "cluster_name"])
            .aggregate_over_time()
            .build();

        assert_eq!(
            cmd,
            "SELECT max(\"value\") AS \"value\" FROM \"node_cpu\" \
             WHERE \"name\"='n1' AND time >= '2020-01-01T00:00:00Z' AND time <= '2020-01-01T01:00:00Z' \
             GROUP BY \"name\",\"cluster_name\",time(30s) ORDER BY time DESC LIMIT 5"
        );
    }

    #[test]
    fn test_zero_condition_emits_no_optional_clauses() {
        let cond = QueryCondition::default();
        let cmd = Statement::new("node_cpu", &cond)
            .filter(Filter::new().eq("name", "n1"))
            .aggregate_over_time()
            .build();

        assert_eq!(cmd, "SELECT * FROM \"node_cpu\" WHERE \"name\"='n1'");
        assert!(!cmd.contains("time"));
        assert!(!cmd.contains("ORDER BY"));
        assert!(!cmd.contains("LIMIT"));
    }

    #[test]
    fn test_aggregate_none_passes_fields_through() {
        let cond = QueryCondition {
            aggregate: AggregateFunction::None,
            ..full_condition()
        };
        let cmd = Statement::new("node_cpu", &cond)
            .select(&["value"])
            .group_by(&["name"])
            .aggregate_over_time()
            .build();

        assert!(cmd.starts_with("SELECT \"value\" FROM"));
        assert!(cmd.contains("GROUP BY \"name\" ORDER BY"));
    }

    #[test]
    fn test_any_of_and_groups() {
        let cond = QueryCondition::default();
        let cmd = Statement::new("node_memory", &cond)
            .filter(
                Filter::new()
                    .any_of("name", ["a", "b"])
                    .any_group(vec![vec![("namespace", "ns"), ("name", "p")], vec![("name", "q")]]),
            )
            .build();

        assert_eq!(
            cmd,
            "SELECT * FROM \"node_memory\" WHERE (\"name\"='a' OR \"name\"='b') AND \
             ((\"namespace\"='ns' AND \"name\"='p') OR (\"name\"='q'))"
        );
    }

    #[test]
    fn test_literals_are_escaped() {
        let cond = QueryCondition::default();
        let cmd = Statement::new("m", &cond).filter(Filter::new().eq("name", "it's")).build();
        assert_eq!(cmd, "SELECT * FROM \"m\" WHERE \"name\"='it\\'s'");
    }

    #[test]
    fn test_start_only() {
        let cond = QueryCondition {
            start: Some(Utc.with_ymd_and_hms(2021, 6, 1, 12, 0, 0).unwrap()),
            order: Order::Asc,
            ..Default::default()
        };
        let cmd = Statement::new("m", &cond).build();
        assert_eq!(cmd, "SELECT * FROM \"m\" WHERE time >= '2021-06-01T12:00:00Z' ORDER BY time ASC");
    }
}
