// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// What an [`EventSource`] saw while waiting
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventBatch {
    /// Paths created or removed since the last batch
    Changed(Vec<PathBuf>),
    /// The timeout elapsed without events
    Quiet,
    /// No more events will arrive
    Closed,
}

/// A stream of filesystem changes, consumed in batches.
#[async_trait]
pub trait EventSource: Send {
    /// Wait for the next batch; `None` waits indefinitely.
    async fn next_batch(&mut self, timeout: Option<Duration>) -> EventBatch;
}

/// A directory to observe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    pub directory: PathBuf,
    pub recursive: bool,
}

/// [`EventSource`] fed by the platform's native watcher (inotify on Linux)
pub struct NotifyEventSource {
    // dropping the watcher stops event delivery
    _watcher: RecommendedWatcher,
    events: mpsc::UnboundedReceiver<Vec<PathBuf>>,
}

impl NotifyEventSource {
    pub fn watch(targets: &[WatchTarget]) -> anyhow::Result<Self> {
        let (tx, events) = mpsc::unbounded_channel();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) if matches!(event.kind, EventKind::Create(_) | EventKind::Remove(_)) => {
                let _ = tx.send(event.paths);
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("filesystem watcher error: {e}"),
        })
        .context("failed to create filesystem watcher")?;

        for target in targets {
            let mode = if target.recursive {
                RecursiveMode::Recursive
            } else {
                RecursiveMode::NonRecursive
            };
            watcher
                .watch(&target.directory, mode)
                .with_context(|| format!("failed to watch {}", target.directory.display()))?;
            tracing::info!(
                directory = %target.directory.display(),
                recursive = target.recursive,
                "watching for snapshot changes"
            );
        }

        Ok(Self {
            _watcher: watcher,
            events,
        })
    }
}

#[async_trait]
impl EventSource for NotifyEventSource {
    async fn next_batch(&mut self, timeout: Option<Duration>) -> EventBatch {
        let first = match timeout {
            None => self.events.recv().await,
            Some(timeout) => match tokio::time::timeout(timeout, self.events.recv()).await {
                Ok(received) => received,
                Err(_) => return EventBatch::Quiet,
            },
        };

        let Some(mut paths) = first else {
            return EventBatch::Closed;
        };
        while let Ok(more) = self.events.try_recv() {
            paths.extend(more);
        }

        EventBatch::Changed(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_created_directories() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = NotifyEventSource::watch(&[WatchTarget {
            directory: dir.path().to_path_buf(),
            recursive: false,
        }])
        .unwrap();

        std::fs::create_dir(dir.path().join("42")).unwrap();

        match source.next_batch(Some(Duration::from_secs(5))).await {
            EventBatch::Changed(paths) => {
                assert!(paths.iter().any(|path| path.ends_with("42")))
            }
            other => panic!("expected a change, got {other:?}"),
        }
        assert_eq!(
            source.next_batch(Some(Duration::from_millis(50))).await,
            EventBatch::Quiet
        );
    }

    #[test]
    fn missing_directory_fails_to_watch() {
        let result = NotifyEventSource::watch(&[WatchTarget {
            directory: PathBuf::from("/nonexistent/snapboot/.snapshots"),
            recursive: true,
        }]);
        assert!(result.is_err());
    }
}
