// SPDX-License-Identifier: GPL-3.0-only

use std::sync::Arc;

use snapboot_sys::{Notification, ServiceNotifier};
use tokio_util::sync::CancellationToken;

use super::debounce::{Debouncer, Trigger};
use super::events::EventSource;
use crate::error::{EXIT_FAILURE, EXIT_INTERRUPTED, PipelineError};
use crate::pipeline::SyncMachine;

/// Keeps the boot stanzas in sync for as long as the process lives.
pub struct WatchRunner {
    machine: Arc<SyncMachine>,
    notifier: ServiceNotifier,
    debouncer: Debouncer,
}

impl WatchRunner {
    pub fn new(machine: Arc<SyncMachine>, notifier: ServiceNotifier, debouncer: Debouncer) -> Self {
        Self {
            machine,
            notifier,
            debouncer,
        }
    }

    /// Run now, then once per settled burst of events until cancelled.
    ///
    /// Failed runs are logged and reported; only the event source going away
    /// ends the loop with a failure.
    pub async fn run<S>(&self, source: &mut S, cancel: CancellationToken) -> u8
    where
        S: EventSource + ?Sized,
    {
        self.sync(&cancel).await;

        if !cancel.is_cancelled() {
            self.notifier.notify_quietly(&[
                Notification::Ready,
                Notification::Status("Watching for snapshot changes".to_string()),
            ]);
        }

        let code = loop {
            if cancel.is_cancelled() {
                break EXIT_INTERRUPTED;
            }

            match self.debouncer.wait(source, &cancel).await {
                Trigger::Fire(paths) => {
                    tracing::info!(changed = paths.len(), "snapshot directories changed");
                    tracing::debug!(?paths, "changed paths");
                    self.sync(&cancel).await;
                }
                Trigger::Shutdown => break EXIT_INTERRUPTED,
                Trigger::SourceClosed => {
                    tracing::error!("filesystem event source closed unexpectedly");
                    self.notifier.notify_quietly(&[
                        Notification::Status("Filesystem watcher stopped".to_string()),
                        Notification::Errno(libc::EIO),
                    ]);
                    break EXIT_FAILURE;
                }
            }
        };

        tracing::info!("watch stopped");
        self.notifier.notify_quietly(&[Notification::Stopping]);
        code
    }

    async fn sync(&self, cancel: &CancellationToken) {
        match super::execute(&self.machine, cancel).await {
            Ok(report) => {
                self.notifier
                    .notify_quietly(&[Notification::Status(report.status_line())]);
            }
            Err(PipelineError::InterruptedByOperator) => {}
            Err(e) => {
                tracing::warn!("waiting for the next change after failed run");
                self.notifier.notify_quietly(&[Notification::Status(format!(
                    "Last run failed: {e}"
                ))]);
            }
        }
    }
}
