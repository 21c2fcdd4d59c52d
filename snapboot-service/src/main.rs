// SPDX-License-Identifier: GPL-3.0-only

//! snapboot - keeps rEFInd boot stanzas in sync with btrfs root snapshots
//!
//! `snapboot run` synchronizes once; `snapboot watch` keeps synchronizing as
//! snapshots come and go and reports its state to the service manager.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use snapboot_service::cli::{Cli, Command};
use snapboot_service::config::Config;
use snapboot_service::error::EXIT_FAILURE;
use snapboot_service::runner::{self, Debouncer, NotifyEventSource, WatchRunner};
use snapboot_service::{Collaborators, logging, wiring};
use snapboot_sys::{Notification, ServiceNotifier};
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    // Exits with status 2 on usage errors
    let cli = Cli::parse();
    let notifier = ServiceNotifier::from_env();

    match start(cli, notifier.clone()).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("snapboot: {e:#}");
            notifier.notify_quietly(&[
                Notification::Status(format!("Failed to start: {e}")),
                Notification::Errno(libc::EINVAL),
            ]);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

async fn start(cli: Cli, notifier: ServiceNotifier) -> Result<u8> {
    let config = Config::load(&cli.config)
        .with_context(|| format!("cannot load configuration {}", cli.config.display()))?;

    logging::init(&config.logging);

    tracing::info!(
        "Starting snapboot v{} ({:?})",
        env!("CARGO_PKG_VERSION"),
        cli.command
    );

    // Check if running as root
    if unsafe { libc::geteuid() } != 0 {
        anyhow::bail!("snapboot must run with root privileges");
    }

    let config = Arc::new(config);
    let machine = wiring::build_machine(
        config.clone(),
        cli.root.clone(),
        Collaborators::system(&cli.root),
    )?;
    let machine = Arc::new(machine);

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let code = match cli.command {
        Command::Run => runner::run_once(machine, cancel).await,
        Command::Watch => {
            let targets = wiring::watch_targets(&config, &cli.root);
            let mut source = NotifyEventSource::watch(&targets)?;
            WatchRunner::new(machine, notifier, Debouncer::default())
                .run(&mut source, cancel)
                .await
        }
    };

    Ok(code)
}

/// Cancel on SIGINT (Ctrl+C) or SIGTERM (service manager stop).
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(stream) => Some(stream),
            Err(e) => {
                tracing::warn!("cannot listen for SIGTERM: {e}");
                None
            }
        };

        let terminated = async {
            match terminate.as_mut() {
                Some(stream) => {
                    stream.recv().await;
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::warn!("cannot listen for Ctrl+C: {e}");
                    return;
                }
            }
            _ = terminated => {}
        }

        tracing::info!("Received shutdown signal");
        cancel.cancel();
    });
}
