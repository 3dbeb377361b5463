//! Stored-offset bookkeeping and the periodic commit task.
//!
//! A record's offset moves through two stages. `poll` marks it *returned*;
//! the next `poll` (or `close`) *stores* it as `offset + 1`, the position of
//! the next record to read. Only stored offsets are ever committed.

use crate::broker::{BrokerClient, TopicPartition};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

pub(crate) type Offsets = BTreeMap<TopicPartition, u64>;

/// Owned by the consumer. Publishes every change of the stored offsets to
/// the commit task through a watch channel.
pub(crate) struct OffsetTracker {
    returned: Option<(TopicPartition, u64)>,
    stored: Offsets,
    published: Arc<watch::Sender<Offsets>>,
}

impl OffsetTracker {
    pub(crate) fn new() -> Self {
        Self {
            returned: None,
            stored: Offsets::new(),
            published: Arc::new(watch::channel(Offsets::new()).0),
        }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Offsets> {
        self.published.subscribe()
    }

    /// Remembers the record handed to the caller. Replaces an earlier mark
    /// that was never stored.
    pub(crate) fn mark_returned(&mut self, tp: TopicPartition, offset: u64) {
        self.returned = Some((tp, offset));
    }

    /// Stores the last returned record, if any.
    pub(crate) fn store_returned(&mut self) {
        let Some((tp, offset)) = self.returned.take() else {
            return;
        };
        let next = offset + 1;
        let current = self.stored.entry(tp).or_insert(next);
        *current = (*current).max(next);
        self.published.send_replace(self.stored.clone());
    }

    pub(crate) fn stored(&self) -> Vec<(TopicPartition, u64)> {
        self.stored
            .iter()
            .map(|(tp, offset)| (tp.clone(), *offset))
            .collect()
    }

    /// Removes and returns the stored offsets of `partitions`.
    pub(crate) fn take(&mut self, partitions: &[TopicPartition]) -> Vec<(TopicPartition, u64)> {
        let taken: Vec<_> = partitions
            .iter()
            .filter_map(|tp| self.stored.remove(tp).map(|offset| (tp.clone(), offset)))
            .collect();
        if !taken.is_empty() {
            self.published.send_replace(self.stored.clone());
        }
        taken
    }

    /// Forgets everything, including the unstored mark.
    pub(crate) fn clear(&mut self) {
        self.returned = None;
        self.stored.clear();
        self.published.send_replace(Offsets::new());
    }
}

/// Background task committing changed offsets every `interval`.
pub(crate) struct AutoCommitter {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl AutoCommitter {
    pub(crate) fn spawn(
        broker: BrokerClient,
        group: String,
        interval: Duration,
        offsets: watch::Receiver<Offsets>,
    ) -> Self {
        let (stop, stopped) = oneshot::channel();
        let handle = tokio::spawn(commit_loop(broker, group, interval, offsets, stopped));
        Self { stop, handle }
    }

    /// Signals the task and waits for it to exit.
    pub(crate) async fn stop(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Auto-commit task failed");
        }
    }
}

async fn commit_loop(
    broker: BrokerClient,
    group: String,
    interval: Duration,
    offsets: watch::Receiver<Offsets>,
    mut stopped: oneshot::Receiver<()>,
) {
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut committed = Offsets::new();

    loop {
        tokio::select! {
            // Fires on an explicit stop and when the consumer is dropped.
            _ = &mut stopped => break,
            _ = ticker.tick() => {
                let changed: Vec<(TopicPartition, u64)> = offsets
                    .borrow()
                    .iter()
                    .filter(|(tp, offset)| committed.get(*tp) != Some(*offset))
                    .map(|(tp, offset)| (tp.clone(), *offset))
                    .collect();
                if changed.is_empty() {
                    continue;
                }
                match broker.commit(group.as_str(), changed.clone()).await {
                    Ok(()) => {
                        debug!(%group, partitions = changed.len(), "Auto-committed");
                        committed.extend(changed);
                    }
                    Err(e) => warn!(%group, error = %e, "Auto-commit failed"),
                }
            }
        }
    }
    debug!(%group, "Auto-commit stopped");
}
