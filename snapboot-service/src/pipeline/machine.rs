// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::Stage;
use super::model::PipelineModel;
use crate::config::Config;
use crate::error::PipelineError;
use crate::persistence::StateStore;

/// One pipeline stage.
///
/// A handler reads the outputs of earlier stages from the model and fills in
/// its own. It must not touch fields owned by other stages.
pub trait StageHandler: Send + Sync {
    fn stage(&self) -> Stage;

    fn run(&self, model: &mut PipelineModel) -> Result<(), PipelineError>;
}

/// Summary of a successful run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub selected: usize,
    pub written: bool,
    pub generation: u64,
}

impl RunReport {
    /// One-line status suitable for the service manager.
    pub fn status_line(&self) -> String {
        if self.written {
            format!(
                "Wrote {} snapshot boot entries (generation {})",
                self.selected, self.generation
            )
        } else {
            format!(
                "{} snapshot boot entries up to date (generation {})",
                self.selected, self.generation
            )
        }
    }
}

/// Runs the fixed stage sequence over a fresh [`PipelineModel`].
pub struct SyncMachine {
    root: PathBuf,
    config: Arc<Config>,
    store: Arc<dyn StateStore>,
    handlers: Vec<Box<dyn StageHandler>>,
}

impl SyncMachine {
    /// `handlers` must cover [`Stage::PIPELINE`] exactly, in order.
    pub fn new(
        root: PathBuf,
        config: Arc<Config>,
        store: Arc<dyn StateStore>,
        handlers: Vec<Box<dyn StageHandler>>,
    ) -> Result<Self, PipelineError> {
        let stages: Vec<Stage> = handlers.iter().map(|handler| handler.stage()).collect();
        if stages != Stage::PIPELINE {
            return Err(PipelineError::ConfigurationError(format!(
                "stage handlers {stages:?} do not match the pipeline {:?}",
                Stage::PIPELINE
            )));
        }

        Ok(Self {
            root,
            config,
            store,
            handlers,
        })
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// Execute one run from `Initial` to `Final`.
    ///
    /// `cancel` is checked before every stage; a stage that has started
    /// always finishes.
    pub fn run(&self, cancel: &CancellationToken) -> Result<RunReport, PipelineError> {
        let mut stage = Stage::Initial;
        tracing::info!(root = %self.root.display(), "sync run started");

        let result = self.advance(&mut stage, cancel);

        match &result {
            Ok(report) => tracing::info!(
                selected = report.selected,
                written = report.written,
                generation = report.generation,
                "sync run finished"
            ),
            Err(PipelineError::InterruptedByOperator) => {
                tracing::warn!(%stage, "sync run interrupted")
            }
            Err(e) => tracing::error!(%stage, kind = e.kind(), "sync run failed: {e}"),
        }
        tracing::debug!(from = %stage, to = %Stage::Final, "stage transition");

        result
    }

    fn advance(
        &self,
        stage: &mut Stage,
        cancel: &CancellationToken,
    ) -> Result<RunReport, PipelineError> {
        let mut model = PipelineModel::new(self.root.clone(), self.config.clone(), &*self.store)?;

        for handler in &self.handlers {
            if cancel.is_cancelled() {
                return Err(PipelineError::InterruptedByOperator);
            }

            let next = handler.stage();
            tracing::debug!(from = %stage, to = %next, "stage transition");
            *stage = next;

            handler.run(&mut model)?;

            if let Some(missing) = model.missing_output(next) {
                return Err(PipelineError::StageIncomplete {
                    stage: next,
                    missing,
                });
            }
        }

        let outcome = model.require_outcome()?;
        Ok(RunReport {
            selected: outcome.selected,
            written: outcome.written,
            generation: outcome.generation,
        })
    }
}
