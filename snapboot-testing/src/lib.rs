// SPDX-License-Identifier: GPL-3.0-only

//! In-memory collaborators and throw-away system roots for exercising the
//! snapboot pipeline without real block devices or btrfs.

pub mod errors;
pub mod fakes;
pub mod fixtures;

pub use fakes::{
    FakeBlockDevices, FakeSnapshots, MemoryStateStore, RecordingConfigStore, ScriptedEvents,
};
pub use fixtures::SystemFixture;
