//! Metrics aggregation layer: resolves resource identities, fans queries out
//! to the time-series stores and folds the answers into one metric map per
//! request.

pub mod aggregator;
pub mod api;
pub mod backend;
pub mod collector;
pub mod config;
pub mod error;
pub mod logging;
pub mod metadata;
pub mod metric;
pub mod metrics;
pub mod query;

pub use error::{DatahubError, Result};
