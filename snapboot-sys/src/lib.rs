// SPDX-License-Identifier: GPL-3.0-only

//! Low-level system collaborators for snapboot
//!
//! This crate talks to the running system directly:
//! - Block device enumeration through `lsblk`
//! - The static mount table (`/etc/fstab`)
//! - Service manager readiness/status notifications
//!
//! Everything here is read-only apart from the notification socket.

pub mod error;
pub mod fstab;
pub mod lsblk;
pub mod notify;
pub mod paths;

pub use error::{Result, SysError};
pub use fstab::{FstabEntry, parse_fstab, read_fstab};
pub use lsblk::{BlockDeviceSource, LsblkSource, parse_lsblk_json};
pub use notify::{Notification, ServiceNotifier};
pub use paths::rebase;
