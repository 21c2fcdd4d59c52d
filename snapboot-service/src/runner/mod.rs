// SPDX-License-Identifier: GPL-3.0-only

//! What starts a run: the operator once, or the snapshot directories changing

mod debounce;
mod events;
mod oneshot;
mod watch;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;
use crate::pipeline::{RunReport, SyncMachine};

pub use debounce::{Debouncer, QUIET_INTERVAL, Trigger};
pub use events::{EventBatch, EventSource, NotifyEventSource, WatchTarget};
pub use oneshot::run_once;
pub use watch::WatchRunner;

/// Run the machine on a blocking thread and wait for it.
///
/// Awaiting here is the only way runs are started, so runs never overlap.
pub async fn execute(
    machine: &Arc<SyncMachine>,
    cancel: &CancellationToken,
) -> Result<RunReport, PipelineError> {
    let machine = machine.clone();
    let cancel = cancel.clone();

    match tokio::task::spawn_blocking(move || machine.run(&cancel)).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(_) => Err(PipelineError::InterruptedByOperator),
    }
}
