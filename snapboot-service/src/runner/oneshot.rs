// SPDX-License-Identifier: GPL-3.0-only

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::pipeline::SyncMachine;

/// Run once and return the process exit code.
pub async fn run_once(machine: Arc<SyncMachine>, cancel: CancellationToken) -> u8 {
    match super::execute(&machine, &cancel).await {
        Ok(report) => {
            tracing::info!("{}", report.status_line());
            0
        }
        Err(e) => e.exit_code(),
    }
}
