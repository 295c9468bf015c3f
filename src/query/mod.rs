//! Backend-agnostic query condition and the two dialect builders on top of it.

pub mod condition;
pub mod filter;
pub mod influxql;
pub mod promql;

pub use condition::{AggregateFunction, Order, QueryCondition, QueryConditionRequest};
pub use filter::Filter;
