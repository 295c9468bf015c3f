//! Fan-out/fan-in collection of metric entries from several sources.
//!
//! Every source partitions the identities into batches and gets one producer
//! task per batch. Producers fetch, convert and send entries over a bounded
//! channel to a single consumer task that owns the [`MetricMap`]. The driver
//! joins every task before returning, on the error path too.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use slog::{debug, error, o, warn, Logger};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::backend::LabeledSeries;
use crate::metric::{Identity, MetricEntry, MetricMap};
use crate::metrics::Stats;
use crate::query::QueryCondition;
use crate::{DatahubError, Result};

const CHANNEL_CAPACITY: usize = 64;

/// One physical signal (e.g. CPU usage) for one resource kind.
#[async_trait]
pub trait MetricSource<E: MetricEntry>: Send + Sync {
    fn name(&self) -> &str;

    /// Splits the identities into the batches fetched by separate producers.
    /// Defaults to a single batch.
    fn partition(&self, ids: &[E::Key]) -> Vec<Vec<E::Key>> {
        vec![ids.to_vec()]
    }

    async fn fetch(&self, ids: &[E::Key], condition: &QueryCondition) -> Result<Vec<LabeledSeries>>;

    /// Turns one fetched series into an entry. `ids` is the batch it was
    /// fetched for. An error marks the series as malformed; it is skipped.
    fn convert(&self, raw: LabeledSeries, ids: &[E::Key]) -> Result<E>;
}

pub type DynSource<E> = Arc<dyn MetricSource<E>>;

/// One batch per identity.
pub fn per_identity<K: Clone>(ids: &[K]) -> Vec<Vec<K>> {
    ids.iter().map(|id| vec![id.clone()]).collect()
}

/// One batch per distinct group key, in key order.
pub fn group_by<K: Clone, G: Ord>(ids: &[K], key: impl Fn(&K) -> G) -> Vec<Vec<K>> {
    let mut groups: BTreeMap<G, Vec<K>> = BTreeMap::new();
    for id in ids {
        groups.entry(key(id)).or_default().push(id.clone());
    }
    groups.into_values().collect()
}

/// What happens to the other producers once one of them fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Abort outstanding producers and return the first error.
    #[default]
    CancelSiblings,
    /// Let every producer finish, then return the first error.
    RunToCompletion,
}

#[derive(Clone)]
pub struct Collector {
    logger: Logger,
    stats: Stats,
    policy: FailurePolicy,
}

impl Collector {
    pub fn new(logger: Logger, stats: Stats) -> Self {
        Self {
            logger,
            stats,
            policy: FailurePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Collects every source over `ids` into one map, sorted and limited per
    /// the condition. No task is spawned when there is nothing to fetch.
    pub async fn collect<E: MetricEntry>(
        &self,
        ids: &[E::Key],
        sources: &[DynSource<E>],
        condition: &QueryCondition,
    ) -> Result<MetricMap<E>> {
        if ids.is_empty() || sources.is_empty() {
            return Ok(MetricMap::new());
        }

        let condition = Arc::new(condition.clone());
        let (tx, mut rx) = mpsc::channel::<E>(CHANNEL_CAPACITY);

        let consumer = tokio::spawn(async move {
            let mut map = MetricMap::new();
            while let Some(entry) = rx.recv().await {
                map.add(entry);
            }
            map
        });

        let mut producers = JoinSet::new();
        for source in sources {
            for batch in source.partition(ids) {
                if batch.is_empty() {
                    continue;
                }
                let logger = self.logger.new(o!("source" => source.name().to_string()));
                producers.spawn(produce(
                    Arc::clone(source),
                    batch,
                    Arc::clone(&condition),
                    tx.clone(),
                    logger,
                    self.stats.clone(),
                ));
            }
        }
        drop(tx);
        debug!(self.logger, "producers spawned"; "count" => producers.len(), "identities" => ids.len());

        let mut first_error: Option<DatahubError> = None;
        while let Some(joined) = producers.join_next().await {
            let outcome = match joined {
                Ok(result) => result,
                Err(err) if err.is_cancelled() => continue,
                Err(err) => Err(DatahubError::Internal(format!("producer task failed: {}", err))),
            };

            if let Err(err) = outcome {
                error!(self.logger, "producer failed"; "error" => %err);
                if first_error.is_none() {
                    first_error = Some(err);
                    if self.policy == FailurePolicy::CancelSiblings {
                        producers.abort_all();
                    }
                }
            }
        }

        // Every sender is gone once the producers are joined, so this drains and ends.
        let mut map = consumer
            .await
            .map_err(|e| DatahubError::Internal(format!("consumer task failed: {}", e)))?;

        if let Some(err) = first_error {
            return Err(err);
        }

        map.sort_by_timestamp(condition.order);
        map.limit(condition.limit);
        Ok(map)
    }
}

async fn produce<E: MetricEntry>(
    source: DynSource<E>,
    batch: Vec<E::Key>,
    condition: Arc<QueryCondition>,
    tx: mpsc::Sender<E>,
    logger: Logger,
    stats: Stats,
) -> Result<()> {
    let raw = source
        .fetch(&batch, &condition)
        .await
        .map_err(|err| DatahubError::fetch(source.name(), describe(&batch), err))?;

    for series in raw {
        match source.convert(series, &batch) {
            Ok(entry) => {
                if tx.send(entry).await.is_err() {
                    return Err(DatahubError::Internal("metric consumer went away".to_string()));
                }
            }
            Err(err) => {
                warn!(logger, "skipping malformed series"; "error" => %err);
                stats.record_malformed(source.name());
            }
        }
    }
    Ok(())
}

fn describe<K: Identity>(batch: &[K]) -> String {
    const SHOWN: usize = 3;
    let mut names: Vec<String> = batch.iter().take(SHOWN).map(|id| id.to_string()).collect();
    if batch.len() > SHOWN {
        names.push(format!("+{} more", batch.len() - SHOWN));
    }
    names.join(",")
}
