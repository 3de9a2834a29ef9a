//! Recursive JSON merge.

use docmesh_types::HlcTimestamp;
use serde_json::{Map, Value};

/// Merge two JSON values that diverged at `local_ts` and `remote_ts`.
///
/// Objects merge field-wise, keeping keys present on only one side.
/// Arrays whose elements are all objects carrying a unique `id` (or
/// `_id`) merge element-wise by that identifier, appending elements
/// that only the remote side has; any other array falls back to
/// last-write-wins as a whole. Mismatched types and differing
/// primitives resolve by last-write-wins.
pub fn merge_values(
    local: &Value,
    local_ts: &HlcTimestamp,
    remote: &Value,
    remote_ts: &HlcTimestamp,
) -> Value {
    match (local, remote) {
        (Value::Object(l), Value::Object(r)) => {
            Value::Object(merge_objects(l, local_ts, r, remote_ts))
        }
        (Value::Array(l), Value::Array(r)) => {
            if let (Some(local_ids), Some(remote_ids)) = (keyed_elements(l), keyed_elements(r)) {
                merge_arrays_by_id(l, &local_ids, local_ts, r, &remote_ids, remote_ts)
            } else {
                pick_newer(local, local_ts, remote, remote_ts)
            }
        }
        _ => pick_newer(local, local_ts, remote, remote_ts),
    }
}

fn merge_objects(
    local: &Map<String, Value>,
    local_ts: &HlcTimestamp,
    remote: &Map<String, Value>,
    remote_ts: &HlcTimestamp,
) -> Map<String, Value> {
    let mut merged = local.clone();
    for (key, remote_value) in remote {
        match local.get(key) {
            Some(local_value) => {
                merged.insert(
                    key.clone(),
                    merge_values(local_value, local_ts, remote_value, remote_ts),
                );
            }
            None => {
                merged.insert(key.clone(), remote_value.clone());
            }
        }
    }
    merged
}

/// Element identifiers when every element is an object with a unique
/// `id` or `_id`; `None` otherwise.
fn keyed_elements(elements: &[Value]) -> Option<Vec<String>> {
    let mut ids = Vec::with_capacity(elements.len());
    for element in elements {
        let id = element_id(element)?;
        if ids.contains(&id) {
            return None;
        }
        ids.push(id);
    }
    Some(ids)
}

fn element_id(element: &Value) -> Option<String> {
    let obj = element.as_object()?;
    let id = obj.get("id").or_else(|| obj.get("_id"))?;
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn merge_arrays_by_id(
    local: &[Value],
    local_ids: &[String],
    local_ts: &HlcTimestamp,
    remote: &[Value],
    remote_ids: &[String],
    remote_ts: &HlcTimestamp,
) -> Value {
    let mut merged = Vec::with_capacity(local.len() + remote.len());
    for (element, id) in local.iter().zip(local_ids) {
        match remote_ids.iter().position(|r| r == id) {
            Some(index) => merged.push(merge_values(element, local_ts, &remote[index], remote_ts)),
            None => merged.push(element.clone()),
        }
    }
    for (element, id) in remote.iter().zip(remote_ids) {
        if !local_ids.contains(id) {
            merged.push(element.clone());
        }
    }
    Value::Array(merged)
}

fn pick_newer(
    local: &Value,
    local_ts: &HlcTimestamp,
    remote: &Value,
    remote_ts: &HlcTimestamp,
) -> Value {
    if remote_ts > local_ts {
        remote.clone()
    } else {
        local.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn t1() -> HlcTimestamp {
        HlcTimestamp::new(100, 0, "a")
    }

    fn t2() -> HlcTimestamp {
        HlcTimestamp::new(200, 0, "b")
    }

    #[test]
    fn disjoint_object_keys_are_both_kept() {
        let local = json!({"name": "A"});
        let remote = json!({"age": 30});
        let merged = merge_values(&local, &t1(), &remote, &t2());
        assert_eq!(merged, json!({"name": "A", "age": 30}));
    }

    #[test]
    fn disjoint_object_merge_is_commutative() {
        let a = json!({"name": "A", "tags": ["x"]});
        let b = json!({"age": 30});
        let ab = merge_values(&a, &t1(), &b, &t2());
        let ba = merge_values(&b, &t2(), &a, &t1());
        assert_eq!(ab, ba);
    }

    #[test]
    fn conflicting_primitives_take_the_newer_side() {
        let merged = merge_values(&json!({"v": 1}), &t1(), &json!({"v": 2}), &t2());
        assert_eq!(merged, json!({"v": 2}));

        let merged = merge_values(&json!({"v": 1}), &t2(), &json!({"v": 2}), &t1());
        assert_eq!(merged, json!({"v": 1}));
    }

    #[test]
    fn type_mismatch_takes_the_newer_side() {
        let merged = merge_values(&json!({"v": [1, 2]}), &t1(), &json!({"v": "x"}), &t2());
        assert_eq!(merged, json!({"v": "x"}));
    }

    #[test]
    fn nested_objects_merge_recursively() {
        let local = json!({"profile": {"name": "A", "tags": [{"id": "1", "v": 1}]}});
        let remote = json!({"profile": {"age": 30, "tags": [{"id": "1", "v": 2}, {"id": "2", "v": 9}]}});
        let merged = merge_values(&local, &t1(), &remote, &t2());
        assert_eq!(
            merged,
            json!({"profile": {"name": "A", "age": 30,
                   "tags": [{"id": "1", "v": 2}, {"id": "2", "v": 9}]}})
        );
    }

    #[test]
    fn keyed_arrays_merge_elementwise_and_append_new() {
        let local = json!([{"id": "1", "v": 1}, {"id": "3", "v": 3}]);
        let remote = json!([{"id": "1", "v": 2}, {"id": "2", "v": 9}]);
        let merged = merge_values(&local, &t1(), &remote, &t2());
        assert_eq!(
            merged,
            json!([{"id": "1", "v": 2}, {"id": "3", "v": 3}, {"id": "2", "v": 9}])
        );
    }

    #[test]
    fn keyed_array_merge_commutes_on_distinct_ids() {
        let a = json!([{"id": "1", "v": 1}]);
        let b = json!([{"id": "2", "v": 2}]);
        let ab = merge_values(&a, &t1(), &b, &t2());
        let ba = merge_values(&b, &t2(), &a, &t1());
        let mut ab_sorted = ab.as_array().unwrap().clone();
        let mut ba_sorted = ba.as_array().unwrap().clone();
        let key = |v: &Value| v["id"].as_str().unwrap().to_string();
        ab_sorted.sort_by_key(key);
        ba_sorted.sort_by_key(key);
        assert_eq!(ab_sorted, ba_sorted);
    }

    #[test]
    fn underscore_id_keys_arrays_too() {
        let local = json!([{"_id": 1, "v": 1}]);
        let remote = json!([{"_id": 1, "v": 2}, {"_id": 2, "v": 9}]);
        let merged = merge_values(&local, &t1(), &remote, &t2());
        assert_eq!(merged, json!([{"_id": 1, "v": 2}, {"_id": 2, "v": 9}]));
    }

    #[test]
    fn unkeyed_arrays_fall_back_to_last_write_wins() {
        let local = json!([1, 2, 3]);
        let remote = json!([4, 5]);
        assert_eq!(merge_values(&local, &t1(), &remote, &t2()), json!([4, 5]));
        assert_eq!(merge_values(&local, &t2(), &remote, &t1()), json!([1, 2, 3]));
    }

    #[test]
    fn duplicate_ids_disable_keyed_merge() {
        let local = json!([{"id": "1", "v": 1}, {"id": "1", "v": 2}]);
        let remote = json!([{"id": "2", "v": 9}]);
        let merged = merge_values(&local, &t1(), &remote, &t2());
        assert_eq!(merged, json!([{"id": "2", "v": 9}]));
    }

    #[test]
    fn mixed_element_arrays_disable_keyed_merge() {
        let local = json!([{"id": "1"}, 42]);
        let remote = json!([{"id": "2"}]);
        let merged = merge_values(&local, &t1(), &remote, &t2());
        assert_eq!(merged, json!([{"id": "2"}]));
    }

    #[test]
    fn equal_primitives_keep_either() {
        let merged = merge_values(&json!("same"), &t1(), &json!("same"), &t2());
        assert_eq!(merged, json!("same"));
    }
}
