// SPDX-License-Identifier: GPL-3.0-only

//! Snapshot selection policy and the state persisted between runs

use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Literal accepted in configuration for "keep every snapshot".
pub const SNAPSHOT_COUNT_UNBOUNDED: &str = "inf";

/// Schema version written into [`PersistedState`].
pub const PERSISTED_STATE_VERSION: u32 = 1;

/// How many snapshots to expose as boot entries.
///
/// The limited count is kept as written so the pipeline can reject
/// non-positive values with a proper configuration error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotCount {
    Limited(i64),
    Unbounded,
}

impl Default for SnapshotCount {
    fn default() -> Self {
        SnapshotCount::Limited(5)
    }
}

impl SnapshotCount {
    /// `Ok(None)` for unbounded, `Ok(Some(n))` for a positive count.
    pub fn limit(self) -> Result<Option<usize>, String> {
        match self {
            SnapshotCount::Unbounded => Ok(None),
            SnapshotCount::Limited(count) if count > 0 => usize::try_from(count)
                .map(Some)
                .map_err(|_| format!("selection count {count} is out of range")),
            SnapshotCount::Limited(count) => Err(format!(
                "selection count must be positive or \"{SNAPSHOT_COUNT_UNBOUNDED}\", got {count}"
            )),
        }
    }
}

impl fmt::Display for SnapshotCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotCount::Limited(count) => write!(f, "{count}"),
            SnapshotCount::Unbounded => f.write_str(SNAPSHOT_COUNT_UNBOUNDED),
        }
    }
}

impl Serialize for SnapshotCount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SnapshotCount::Limited(count) => serializer.serialize_i64(*count),
            SnapshotCount::Unbounded => serializer.serialize_str(SNAPSHOT_COUNT_UNBOUNDED),
        }
    }
}

impl<'de> Deserialize<'de> for SnapshotCount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CountVisitor;

        impl Visitor<'_> for CountVisitor {
            type Value = SnapshotCount;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "an integer or \"{SNAPSHOT_COUNT_UNBOUNDED}\"")
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
                Ok(SnapshotCount::Limited(value))
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
                i64::try_from(value)
                    .map(SnapshotCount::Limited)
                    .map_err(|_| E::custom(format!("selection count {value} is out of range")))
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
                if value.trim() == SNAPSHOT_COUNT_UNBOUNDED {
                    return Ok(SnapshotCount::Unbounded);
                }
                value
                    .trim()
                    .parse::<i64>()
                    .map(SnapshotCount::Limited)
                    .map_err(|_| E::invalid_value(de::Unexpected::Str(value), &self))
            }
        }

        deserializer.deserialize_any(CountVisitor)
    }
}

/// How generated entries reference their snapshot in `rootflags`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubvolumeReference {
    /// Keep whichever of `subvol` / `subvolid` the template uses
    #[default]
    Inherit,
    /// Always write `subvol=<path>`
    Path,
    /// Always write `subvolid=<id>`
    Id,
}

/// Stable identity of a selected snapshot
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotKey {
    pub id: u64,
    pub uuid: String,
    /// Filesystem-tree path the generated entry points at
    pub path: String,
}

impl SnapshotKey {
    /// Identity ignoring where the subvolume currently lives.
    pub fn same_snapshot(&self, other: &SnapshotKey) -> bool {
        self.id == other.id && self.uuid == other.uuid
    }
}

/// What the last successful reconciliation wrote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub version: u32,
    pub generation: u64,
    /// Rendered template entry the generated stanzas were derived from
    pub template: String,
    pub selection: Vec<SnapshotKey>,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            version: PERSISTED_STATE_VERSION,
            generation: 0,
            template: String::new(),
            selection: Vec::new(),
        }
    }
}

impl PersistedState {
    /// Same snapshots at the same paths, in the same order.
    pub fn has_selection(&self, selection: &[SnapshotKey]) -> bool {
        self.selection == selection
    }

    /// The state that follows this one after writing `selection`.
    pub fn successor(&self, template: String, selection: Vec<SnapshotKey>) -> Self {
        Self {
            version: PERSISTED_STATE_VERSION,
            generation: self.generation + 1,
            template,
            selection,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Holder {
        count: SnapshotCount,
    }

    fn key(id: u64) -> SnapshotKey {
        SnapshotKey {
            id,
            uuid: format!("uuid-{id}"),
            path: format!("@snapshots/{id}"),
        }
    }

    #[test]
    fn parses_count_from_toml() {
        let holder: Holder = toml::from_str("count = 3").unwrap();
        assert_eq!(holder.count, SnapshotCount::Limited(3));

        let holder: Holder = toml::from_str("count = \"inf\"").unwrap();
        assert_eq!(holder.count, SnapshotCount::Unbounded);

        assert!(toml::from_str::<Holder>("count = \"lots\"").is_err());
    }

    #[test]
    fn rejects_non_positive_limits() {
        assert_eq!(SnapshotCount::Limited(2).limit(), Ok(Some(2)));
        assert_eq!(SnapshotCount::Unbounded.limit(), Ok(None));
        assert!(SnapshotCount::Limited(0).limit().is_err());
        assert!(SnapshotCount::Limited(-4).limit().is_err());
    }

    #[test]
    fn selection_comparison_is_order_sensitive() {
        let state = PersistedState::default().successor(String::new(), vec![key(3), key(2)]);
        assert!(state.has_selection(&[key(3), key(2)]));
        assert!(!state.has_selection(&[key(2), key(3)]));
        assert!(!state.has_selection(&[key(3)]));
    }

    #[test]
    fn moved_snapshot_is_the_same_snapshot_but_a_different_selection() {
        let mut moved = key(3);
        moved.path = "elsewhere".to_string();
        assert!(moved.same_snapshot(&key(3)));

        let state = PersistedState::default().successor(String::new(), vec![key(3)]);
        assert!(!state.has_selection(&[moved]));
    }

    #[test]
    fn successor_bumps_generation() {
        let first = PersistedState::default().successor("t".to_string(), vec![key(1)]);
        let second = first.successor("t".to_string(), Vec::new());
        assert_eq!(first.generation, 1);
        assert_eq!(second.generation, 2);
        assert_eq!(second.version, PERSISTED_STATE_VERSION);
        let json = serde_json::to_string(&second).unwrap();
        assert!(json.contains("\"generation\":2"));
    }
}
