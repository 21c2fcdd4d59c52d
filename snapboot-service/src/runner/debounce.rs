// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::events::{EventBatch, EventSource};

/// How long the directories must stay quiet before a run starts
pub const QUIET_INTERVAL: Duration = Duration::from_secs(1);

/// Why [`Debouncer::wait`] returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// A burst of changes settled; start a run
    Fire(Vec<PathBuf>),
    /// The operator asked to stop
    Shutdown,
    /// The event source ended with nothing pending
    SourceClosed,
}

/// Collapses bursts of events into one trigger.
///
/// The first event arms a quiet timer; every further event restarts it.
#[derive(Debug, Clone, Copy)]
pub struct Debouncer {
    quiet: Duration,
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(QUIET_INTERVAL)
    }
}

impl Debouncer {
    pub fn new(quiet: Duration) -> Self {
        Self { quiet }
    }

    pub async fn wait<S>(&self, source: &mut S, cancel: &CancellationToken) -> Trigger
    where
        S: EventSource + ?Sized,
    {
        let mut armed = false;
        let mut pending: Vec<PathBuf> = Vec::new();

        loop {
            let timeout = armed.then_some(self.quiet);
            let batch = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Trigger::Shutdown,
                batch = source.next_batch(timeout) => batch,
            };

            match batch {
                EventBatch::Changed(paths) => {
                    tracing::trace!(count = paths.len(), "change observed, restarting quiet timer");
                    armed = true;
                    pending.extend(paths);
                }
                EventBatch::Quiet if armed => return Trigger::Fire(settle(pending)),
                EventBatch::Quiet => {}
                EventBatch::Closed if armed => return Trigger::Fire(settle(pending)),
                EventBatch::Closed => return Trigger::SourceClosed,
            }
        }
    }
}

fn settle(mut paths: Vec<PathBuf>) -> Vec<PathBuf> {
    paths.sort();
    paths.dedup();
    paths
}
