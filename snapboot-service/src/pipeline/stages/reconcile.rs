// SPDX-License-Identifier: GPL-3.0-only

use std::path::{Path, PathBuf};
use std::sync::Arc;

use snapboot_refind::{
    BootConfigStore, BootMenuEntry, ConfigFile, STANZA_DIR, StanzaUpdate, SubvolumeKey,
    SubvolumeSelector, render_stanza_file, stanza_file_name,
};
use snapboot_types::{Snapshot, SnapshotKey, SubvolumeReference};

use crate::error::PipelineError;
use crate::pipeline::{PipelineModel, ReconcileOutcome, Stage, StageHandler};

/// Membership change between the persisted and the new selection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionDiff {
    pub added: Vec<SnapshotKey>,
    pub removed: Vec<SnapshotKey>,
}

impl SelectionDiff {
    pub fn between(previous: &[SnapshotKey], next: &[SnapshotKey]) -> Self {
        let contains = |keys: &[SnapshotKey], key: &SnapshotKey| {
            keys.iter().any(|candidate| candidate.same_snapshot(key))
        };

        Self {
            added: next
                .iter()
                .filter(|key| !contains(previous, key))
                .cloned()
                .collect(),
            removed: previous
                .iter()
                .filter(|key| !contains(next, key))
                .cloned()
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Writes generated stanzas for the selection, then commits the persisted state.
pub struct ReconcileAndWrite {
    store: Arc<dyn BootConfigStore>,
}

impl ReconcileAndWrite {
    pub fn new(store: Arc<dyn BootConfigStore>) -> Self {
        Self { store }
    }
}

impl StageHandler for ReconcileAndWrite {
    fn stage(&self) -> Stage {
        Stage::ReconcileAndWrite
    }

    fn run(&self, model: &mut PipelineModel) -> Result<(), PipelineError> {
        let parsed = model.require_boot_config()?;
        let selection = model.require_selection()?;
        let reference = model.config.boot_stanza_generation.subvolume_reference;

        let keys: Vec<SnapshotKey> = selection.iter().map(Snapshot::key).collect();
        let template_text = parsed.template.render();

        let refind_dir = parsed.root_config.parent().unwrap_or_else(|| Path::new("/"));
        let file_name = stanza_file_name(parsed.template.title());
        let stanza_file = refind_dir.join(STANZA_DIR).join(&file_name);
        let include = format!("{STANZA_DIR}/{file_name}");
        let root_file = parsed.config.root();

        let entries = selection
            .iter()
            .map(|snapshot| derive_entry(&parsed.template, snapshot, reference))
            .collect::<Result<Vec<_>, _>>()?;
        let content = render_stanza_file(&entries);

        let retired = Retired::plan(
            parsed.config.stale_managed_files(&stanza_file),
            refind_dir,
            root_file,
        );
        let needs_include = !root_file.has_include(&include);
        let root_config_content = (needs_include || !retired.includes.is_empty()).then(|| {
            root_file.render_with_includes(
                &retired.includes,
                needs_include.then_some(include.as_str()),
            )
        });

        let persisted = model.persisted();
        let unchanged = persisted.has_selection(&keys)
            && persisted.template == template_text
            && root_config_content.is_none()
            && retired.is_empty()
            && self.store.read_stanzas(&stanza_file).as_deref() == Some(content.as_str());

        if unchanged {
            let generation = persisted.generation;
            tracing::info!(
                selected = keys.len(),
                generation,
                "boot stanzas already match the selection, nothing to write"
            );
            model.outcome = Some(ReconcileOutcome {
                written: false,
                selected: keys.len(),
                generation,
                stanza_file,
            });
            return Ok(());
        }

        let diff = SelectionDiff::between(&persisted.selection, &keys);
        tracing::info!(
            added = diff.added.len(),
            removed = diff.removed.len(),
            reordered = diff.is_empty() && !persisted.has_selection(&keys),
            template_changed = persisted.template != template_text,
            stale_files = retired.removed.len() + retired.emptied.len(),
            "regenerating boot stanzas"
        );

        let update = StanzaUpdate {
            stanza_file: stanza_file.clone(),
            content,
            root_config: parsed.root_config.clone(),
            root_config_content,
            removed: retired.removed,
            emptied: retired.emptied,
        };

        self.store
            .write_stanzas(&update)
            .map_err(|e| PipelineError::PersistenceWriteError(e.to_string()))?;

        let next = persisted.successor(template_text, keys);
        let generation = next.generation;
        let selected = next.selection.len();
        model.commit_state(next)?;

        model.outcome = Some(ReconcileOutcome {
            written: true,
            selected,
            generation,
            stanza_file,
        });
        Ok(())
    }
}

/// Generated stanza files left behind by an earlier template title
#[derive(Debug, Default)]
struct Retired {
    /// Root `include` targets to drop
    includes: Vec<String>,
    /// Files only the root included
    removed: Vec<PathBuf>,
    /// Files included from somewhere else, kept but emptied
    emptied: Vec<PathBuf>,
}

impl Retired {
    fn plan(stale: Vec<PathBuf>, refind_dir: &Path, root_file: &ConfigFile) -> Self {
        let mut retired = Self::default();

        for path in stale {
            let target = path
                .strip_prefix(refind_dir)
                .ok()
                .map(|relative| relative.to_string_lossy().into_owned())
                .filter(|target| root_file.has_include(target));

            match target {
                Some(target) => {
                    retired.includes.push(target);
                    retired.removed.push(path);
                }
                None => retired.emptied.push(path),
            }
        }

        retired
    }

    fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.emptied.is_empty()
    }
}

/// Clone `template` for `snapshot`.
///
/// The title gains the snapshot's name and the `rootflags` subvolume item
/// points at the snapshot; nothing else changes.
pub fn derive_entry(
    template: &BootMenuEntry,
    snapshot: &Snapshot,
    reference: SubvolumeReference,
) -> Result<BootMenuEntry, PipelineError> {
    let current = template
        .subvolume_selector()
        .map_err(|e| PipelineError::ConfigurationError(e.to_string()))?;

    let key = match reference {
        SubvolumeReference::Inherit => current.key,
        SubvolumeReference::Path => SubvolumeKey::Path,
        SubvolumeReference::Id => SubvolumeKey::Id,
    };

    let value = match key {
        // keep the template's leading-slash convention
        SubvolumeKey::Path if current.key == SubvolumeKey::Path && current.value.starts_with('/') => {
            format!("/{}", snapshot.subvolume_path.trim_start_matches('/'))
        }
        SubvolumeKey::Path => snapshot.subvolume_path.clone(),
        SubvolumeKey::Id => snapshot.id.to_string(),
    };

    let title = format!("{} ({})", template.title(), snapshot.display_name());

    template
        .derive(&title, &SubvolumeSelector { key, value })
        .map_err(|e| PipelineError::ConfigurationError(e.to_string()))
}
