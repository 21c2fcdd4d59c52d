// SPDX-License-Identifier: GPL-3.0-only

use std::sync::Arc;

use snapboot_refind::{BootConfigStore, RefindError};

use crate::error::PipelineError;
use crate::pipeline::{ParsedBootConfig, PipelineModel, Stage, StageHandler};

/// Parses the rEFInd configuration on the ESP and picks the template entry.
pub struct ParseBootConfig {
    store: Arc<dyn BootConfigStore>,
}

impl ParseBootConfig {
    pub fn new(store: Arc<dyn BootConfigStore>) -> Self {
        Self { store }
    }
}

impl StageHandler for ParseBootConfig {
    fn stage(&self) -> Stage {
        Stage::ParseBootConfig
    }

    fn run(&self, model: &mut PipelineModel) -> Result<(), PipelineError> {
        let esp_mount = &model.require_devices()?.esp_mount;
        let settings = &model.config.boot_stanza_generation;

        let root_config = self
            .store
            .locate(esp_mount, &settings.refind_config)
            .map_err(|e| PipelineError::ConfigurationError(e.to_string()))?;

        let config = self.store.load(&root_config).map_err(|e| match e {
            RefindError::Syntax { .. } => PipelineError::ConfigParseError(e.to_string()),
            other => PipelineError::ConfigParseError(format!(
                "cannot read {}: {other}",
                root_config.display()
            )),
        })?;

        let template = config
            .find_template(&settings.template_entry)
            .cloned()
            .ok_or_else(|| {
                PipelineError::ConfigurationError(format!(
                    "no menuentry titled '{}' in {}",
                    settings.template_entry,
                    root_config.display()
                ))
            })?;

        // Every generated entry rewrites this item, so it must be unambiguous
        template
            .subvolume_selector()
            .map_err(|e| PipelineError::ConfigurationError(e.to_string()))?;

        tracing::info!(
            config = %root_config.display(),
            files = config.files.len(),
            entries = config.entries().count(),
            managed = config.managed_entries().count(),
            template = %template.title(),
            template_source = %template.source().display(),
            template_line = template.line(),
            "boot configuration parsed"
        );
        tracing::debug!(
            loader = template.loader().unwrap_or("-"),
            initrd = template.initrd().unwrap_or("-"),
            "template boot files"
        );

        model.boot_config = Some(ParsedBootConfig {
            root_config,
            config,
            template,
        });
        Ok(())
    }
}
