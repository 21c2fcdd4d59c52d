// SPDX-License-Identifier: GPL-3.0-only

use snapboot_types::Snapshot;

use crate::error::PipelineError;
use crate::pipeline::{PipelineModel, Stage, StageHandler};

/// Picks the newest read-only snapshots, up to the configured count.
pub struct SelectSnapshots;

impl StageHandler for SelectSnapshots {
    fn stage(&self) -> Stage {
        Stage::SelectSnapshots
    }

    fn run(&self, model: &mut PipelineModel) -> Result<(), PipelineError> {
        let count = model.config.snapshot_manipulation.selection_count;
        let limit = count.limit().map_err(PipelineError::ConfigurationError)?;

        let selection = select_snapshots(model.require_snapshots()?, limit);
        tracing::info!(%count, selected = selection.len(), "snapshots selected");

        model.selection = Some(selection);
        Ok(())
    }
}

/// Newest first; equal creation times order by descending subvolume id.
///
/// `limit` of `None` keeps every eligible snapshot.
pub fn select_snapshots(snapshots: &[Snapshot], limit: Option<usize>) -> Vec<Snapshot> {
    let mut eligible: Vec<&Snapshot> = snapshots
        .iter()
        .filter(|snapshot| {
            if !snapshot.read_only {
                tracing::warn!(
                    path = %snapshot.path.display(),
                    id = snapshot.id,
                    "writable snapshot excluded from boot entries"
                );
            }
            snapshot.read_only
        })
        .collect();

    eligible.sort_by(|a, b| b.cmp_creation(a));
    eligible.truncate(limit.unwrap_or(usize::MAX));
    eligible.into_iter().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn snapshot(id: u64, created_at: i64, read_only: bool) -> Snapshot {
        Snapshot {
            id,
            uuid: format!("uuid-{id}"),
            parent_uuid: Some("root".to_string()),
            created_at,
            generation: id,
            path: PathBuf::from(format!("/.snapshots/{id}/snapshot")),
            subvolume_path: format!("@snapshots/{id}/snapshot"),
            read_only,
        }
    }

    fn ids(selection: &[Snapshot]) -> Vec<u64> {
        selection.iter().map(|snapshot| snapshot.id).collect()
    }

    #[test]
    fn keeps_the_newest_snapshots() {
        let snapshots = vec![snapshot(1, 1, true), snapshot(2, 2, true), snapshot(3, 3, true)];
        assert_eq!(ids(&select_snapshots(&snapshots, Some(2))), vec![3, 2]);
    }

    #[test]
    fn breaks_creation_ties_by_id() {
        let snapshots = vec![snapshot(7, 5, true), snapshot(4, 5, true), snapshot(9, 1, true)];
        let first = select_snapshots(&snapshots, Some(2));
        let mut shuffled = snapshots.clone();
        shuffled.reverse();
        assert_eq!(ids(&first), vec![7, 4]);
        assert_eq!(select_snapshots(&shuffled, Some(2)), first);
    }

    #[test]
    fn unbounded_keeps_every_read_only_snapshot() {
        let snapshots: Vec<Snapshot> = (1..=40).map(|id| snapshot(id, id as i64, true)).collect();
        assert_eq!(select_snapshots(&snapshots, None).len(), 40);
    }

    #[test]
    fn writable_snapshots_are_excluded() {
        let snapshots = vec![snapshot(1, 1, true), snapshot(2, 2, false), snapshot(3, 3, true)];
        assert_eq!(ids(&select_snapshots(&snapshots, Some(5))), vec![3, 1]);
        assert!(select_snapshots(&[snapshot(1, 1, false)], None).is_empty());
    }
}
