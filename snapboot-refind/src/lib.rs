// SPDX-License-Identifier: GPL-3.0-only

//! rEFInd configuration handling for snapboot
//!
//! - [`parser`]: line-oriented parser that follows `include` directives and
//!   keeps raw text so unmodified files serialize byte-identically
//! - [`entry`]: the [`BootMenuEntry`] model and the `rootflags` subvolume rewrite
//! - [`writer`]: atomic writes of generated stanza files
//! - [`store`]: the [`BootConfigStore`] seam used by the sync pipeline

pub mod entry;
pub mod error;
pub mod grammar;
pub mod parser;
pub mod store;
pub mod writer;

pub use entry::{BootMenuEntry, SubvolumeKey, SubvolumeSelector};
pub use error::{RefindError, Result};
pub use grammar::BootOption;
pub use parser::{BootConfig, ConfigFile, find_config_file, load_config, parse_config};
pub use store::{BootConfigStore, FileConfigStore, StanzaUpdate};
pub use writer::{
    STANZA_DIR, STANZA_DIR_MODE, atomic_write, ensure_stanza_dir, render_stanza_file,
    stanza_file_name,
};
