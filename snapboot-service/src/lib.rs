// SPDX-License-Identifier: GPL-3.0-only

//! snapboot: keeps rEFInd boot stanzas in sync with btrfs snapshots of the
//! root subvolume.
//!
//! A run walks a fixed pipeline (see [`pipeline::Stage`]) over a fresh
//! [`pipeline::PipelineModel`]. The [`runner`] module drives runs either once
//! or whenever the snapshot directories change.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod persistence;
pub mod pipeline;
pub mod runner;
pub mod wiring;

pub use config::Config;
pub use error::PipelineError;
pub use pipeline::{RunReport, Stage, SyncMachine};
pub use wiring::Collaborators;
