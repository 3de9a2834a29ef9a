//! Conflict resolution between local document state and remote writes.

use crate::merge_values;
use docmesh_types::{Document, HlcTimestamp, OplogEntry};
use serde_json::Value;
use thiserror::Error;

/// How concurrent writes to the same document are reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// Highest timestamp wins at document granularity.
    #[default]
    LastWriteWins,
    /// Structured JSON merges field-wise; see [`merge_values`].
    RecursiveMerge,
}

/// Outcome of resolving one remote oplog entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Replace local state with this document.
    Apply(Document),
    /// The remote write is stale; keep local state.
    Ignore,
}

/// Resolution failure.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// A document payload that should be JSON did not parse.
    #[error("invalid json payload for {collection}/{key}: {source}")]
    InvalidJson {
        /// Collection of the offending document.
        collection: String,
        /// Key of the offending document.
        key: String,
        /// The underlying parse error.
        #[source]
        source: serde_json::Error,
    },
}

/// Resolve a remote oplog entry against the current local document.
///
/// The result is deterministic in `(local, remote)`, so any two nodes
/// that have observed the same set of entries converge to the same
/// state regardless of arrival order.
pub fn resolve(
    local: Option<&Document>,
    remote: &OplogEntry,
    policy: MergePolicy,
) -> Result<Resolution, ResolveError> {
    let local = match local {
        None => return Ok(Resolution::Apply(document_from(remote))),
        Some(local) => local,
    };

    match policy {
        MergePolicy::LastWriteWins => Ok(last_write_wins(local, remote)),
        MergePolicy::RecursiveMerge => recursive_merge(local, remote),
    }
}

fn last_write_wins(local: &Document, remote: &OplogEntry) -> Resolution {
    if remote.timestamp > local.timestamp {
        Resolution::Apply(document_from(remote))
    } else {
        Resolution::Ignore
    }
}

fn recursive_merge(local: &Document, remote: &OplogEntry) -> Result<Resolution, ResolveError> {
    // Deletes and empty payloads carry no structure to merge.
    if remote.is_delete()
        || local.tombstone
        || local.data.is_empty()
        || remote.data.is_empty()
    {
        return Ok(last_write_wins(local, remote));
    }

    let local_value = parse_payload(&local.collection, &local.key, &local.data)?;
    let remote_value = parse_payload(&remote.collection, &remote.key, &remote.data)?;
    if local_value.is_null() || remote_value.is_null() {
        return Ok(last_write_wins(local, remote));
    }

    let merged = merge_values(
        &local_value,
        &local.timestamp,
        &remote_value,
        &remote.timestamp,
    );
    let timestamp = local.timestamp.clone().max(remote.timestamp.clone());
    let data = serde_json::to_vec(&merged).map_err(|source| ResolveError::InvalidJson {
        collection: local.collection.clone(),
        key: local.key.clone(),
        source,
    })?;
    Ok(Resolution::Apply(Document::new(
        local.collection.clone(),
        local.key.clone(),
        data,
        timestamp,
    )))
}

fn document_from(remote: &OplogEntry) -> Document {
    if remote.is_delete() {
        Document::tombstone(
            remote.collection.clone(),
            remote.key.clone(),
            remote.timestamp.clone(),
        )
    } else {
        Document::new(
            remote.collection.clone(),
            remote.key.clone(),
            remote.data.clone(),
            remote.timestamp.clone(),
        )
    }
}

fn parse_payload(collection: &str, key: &str, data: &[u8]) -> Result<Value, ResolveError> {
    serde_json::from_slice(data).map_err(|source| ResolveError::InvalidJson {
        collection: collection.to_string(),
        key: key.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ts(wall: u64, node: &str) -> HlcTimestamp {
        HlcTimestamp::new(wall, 0, node)
    }

    fn put(wall: u64, node: &str, value: serde_json::Value) -> OplogEntry {
        OplogEntry::put(
            "users",
            "alice",
            serde_json::to_vec(&value).unwrap(),
            ts(wall, node),
        )
    }

    fn doc(wall: u64, node: &str, value: serde_json::Value) -> Document {
        Document::new(
            "users",
            "alice",
            serde_json::to_vec(&value).unwrap(),
            ts(wall, node),
        )
    }

    #[test]
    fn missing_local_applies_remote_put() {
        let remote = put(100, "a", json!({"name": "Alice"}));
        let resolution = resolve(None, &remote, MergePolicy::LastWriteWins).unwrap();
        match resolution {
            Resolution::Apply(applied) => {
                assert_eq!(applied.timestamp, ts(100, "a"));
                assert!(!applied.tombstone);
            }
            Resolution::Ignore => panic!("expected apply"),
        }
    }

    #[test]
    fn missing_local_applies_remote_delete_as_tombstone() {
        let remote = OplogEntry::delete("users", "bob", ts(300, "a"));
        let resolution = resolve(None, &remote, MergePolicy::LastWriteWins).unwrap();
        match resolution {
            Resolution::Apply(applied) => {
                assert!(applied.tombstone);
                assert!(applied.data.is_empty());
                assert_eq!(applied.timestamp, ts(300, "a"));
            }
            Resolution::Ignore => panic!("expected apply"),
        }
    }

    #[test]
    fn newer_remote_wins() {
        let local = doc(100, "a", json!({"v": 1}));
        let remote = put(200, "b", json!({"v": 2}));
        let resolution = resolve(Some(&local), &remote, MergePolicy::LastWriteWins).unwrap();
        assert!(matches!(resolution, Resolution::Apply(d) if d.timestamp == ts(200, "b")));
    }

    #[test]
    fn stale_remote_is_ignored() {
        let local = doc(200, "b", json!({"v": 2}));
        let remote = put(100, "a", json!({"v": 1}));
        let resolution = resolve(Some(&local), &remote, MergePolicy::LastWriteWins).unwrap();
        assert_eq!(resolution, Resolution::Ignore);
    }

    #[test]
    fn equal_timestamps_are_ignored_making_replays_idempotent() {
        let local = doc(100, "a", json!({"v": 1}));
        let remote = put(100, "a", json!({"v": 1}));
        let resolution = resolve(Some(&local), &remote, MergePolicy::LastWriteWins).unwrap();
        assert_eq!(resolution, Resolution::Ignore);
    }

    #[test]
    fn applying_the_same_entry_twice_converges() {
        let remote = put(100, "a", json!({"v": 1}));
        let first = resolve(None, &remote, MergePolicy::LastWriteWins).unwrap();
        let applied = match first {
            Resolution::Apply(d) => d,
            Resolution::Ignore => panic!("expected apply"),
        };
        let second = resolve(Some(&applied), &remote, MergePolicy::LastWriteWins).unwrap();
        assert_eq!(second, Resolution::Ignore);
    }

    #[test]
    fn merge_policy_combines_objects_and_keyed_arrays() {
        let local = doc(
            100,
            "a",
            json!({"profile": {"name": "A", "tags": [{"id": "1", "v": 1}]}}),
        );
        let remote = put(
            200,
            "b",
            json!({"profile": {"age": 30, "tags": [{"id": "1", "v": 2}, {"id": "2", "v": 9}]}}),
        );
        let resolution = resolve(Some(&local), &remote, MergePolicy::RecursiveMerge).unwrap();
        let applied = match resolution {
            Resolution::Apply(d) => d,
            Resolution::Ignore => panic!("expected apply"),
        };
        assert_eq!(applied.timestamp, ts(200, "b"));
        assert_eq!(
            applied.json().unwrap(),
            json!({"profile": {"name": "A", "age": 30,
                   "tags": [{"id": "1", "v": 2}, {"id": "2", "v": 9}]}})
        );
    }

    #[test]
    fn merge_policy_carries_the_higher_timestamp_even_when_local_is_newer() {
        let local = doc(300, "a", json!({"name": "A"}));
        let remote = put(200, "b", json!({"age": 30}));
        let resolution = resolve(Some(&local), &remote, MergePolicy::RecursiveMerge).unwrap();
        let applied = match resolution {
            Resolution::Apply(d) => d,
            Resolution::Ignore => panic!("expected apply"),
        };
        assert_eq!(applied.timestamp, ts(300, "a"));
        assert_eq!(applied.json().unwrap(), json!({"name": "A", "age": 30}));
    }

    #[test]
    fn merge_policy_treats_deletes_as_last_write_wins() {
        let local = doc(100, "a", json!({"v": 1}));
        let newer_delete = OplogEntry::delete("users", "alice", ts(200, "b"));
        let resolution = resolve(Some(&local), &newer_delete, MergePolicy::RecursiveMerge).unwrap();
        match resolution {
            Resolution::Apply(applied) => {
                assert!(applied.tombstone);
                assert_eq!(applied.timestamp, ts(200, "b"));
            }
            Resolution::Ignore => panic!("expected apply"),
        }

        let stale_delete = OplogEntry::delete("users", "alice", ts(50, "b"));
        let resolution = resolve(Some(&local), &stale_delete, MergePolicy::RecursiveMerge).unwrap();
        assert_eq!(resolution, Resolution::Ignore);
    }

    #[test]
    fn merge_policy_with_null_side_falls_back_to_last_write_wins() {
        let local = doc(100, "a", json!(null));
        let remote = put(200, "b", json!({"v": 1}));
        let resolution = resolve(Some(&local), &remote, MergePolicy::RecursiveMerge).unwrap();
        assert!(matches!(resolution, Resolution::Apply(d) if !d.tombstone));
    }

    #[test]
    fn merge_policy_over_tombstone_falls_back_to_last_write_wins() {
        let local = Document::tombstone("users", "alice", ts(100, "a"));
        let remote = put(200, "b", json!({"v": 1}));
        let resolution = resolve(Some(&local), &remote, MergePolicy::RecursiveMerge).unwrap();
        match resolution {
            Resolution::Apply(applied) => {
                assert!(!applied.tombstone);
                assert_eq!(applied.json().unwrap(), json!({"v": 1}));
            }
            Resolution::Ignore => panic!("expected apply"),
        }
    }

    #[test]
    fn malformed_json_surfaces_an_error_under_merge() {
        let local = Document::new("users", "alice", b"not json".to_vec(), ts(100, "a"));
        let remote = put(200, "b", json!({"v": 1}));
        let result = resolve(Some(&local), &remote, MergePolicy::RecursiveMerge);
        assert!(matches!(result, Err(ResolveError::InvalidJson { .. })));
    }
}
