//! Three-way JSON merge patch computation. The patches are applied with
//! `json_patch::merge`.

use serde_json::{Map, Value};

/// Patch turning `current` into `modified`, deleting keys that were in
/// `original` (the last applied manifest) but have since been dropped.
///
/// Keys present only in `current` are left alone; they belong to the server
/// or to other writers. Arrays and scalars are replaced wholesale.
pub fn three_way_merge_patch(original: Option<&Value>, modified: &Value, current: &Value) -> Value {
    let mut patch = diff(modified, current);
    if let Some(original) = original {
        let deletions = deletions(original, modified, current);
        merge_into(&mut patch, deletions);
    }
    Value::Object(patch)
}

/// True when the patch would not change anything.
pub fn is_empty_patch(patch: &Value) -> bool {
    match patch {
        Value::Object(map) => map.is_empty(),
        Value::Null => true,
        _ => false,
    }
}

/// Additions and changes needed to bring `current` up to `modified`.
fn diff(modified: &Value, current: &Value) -> Map<String, Value> {
    let mut patch = Map::new();
    let Value::Object(modified) = modified else {
        return patch;
    };
    let empty = Map::new();
    let current = current.as_object().unwrap_or(&empty);

    for (key, want) in modified {
        match (want, current.get(key)) {
            (Value::Null, Some(_)) => {
                patch.insert(key.clone(), Value::Null);
            }
            (Value::Null, None) => {}
            (Value::Object(_), Some(have @ Value::Object(_))) => {
                let nested = diff(want, have);
                if !nested.is_empty() {
                    patch.insert(key.clone(), Value::Object(nested));
                }
            }
            (want, Some(have)) if want == have => {}
            (want, _) => {
                patch.insert(key.clone(), want.clone());
            }
        }
    }
    patch
}

/// `null` entries for keys dropped from the manifest since `original`.
fn deletions(original: &Value, modified: &Value, current: &Value) -> Map<String, Value> {
    let mut patch = Map::new();
    let (Value::Object(original), Value::Object(current)) = (original, current) else {
        return patch;
    };
    let empty = Map::new();
    let modified = modified.as_object().unwrap_or(&empty);

    for (key, was) in original {
        let Some(have) = current.get(key) else {
            continue;
        };
        match modified.get(key) {
            None => {
                patch.insert(key.clone(), Value::Null);
            }
            Some(want @ Value::Object(_)) if was.is_object() => {
                let nested = deletions(was, want, have);
                if !nested.is_empty() {
                    patch.insert(key.clone(), Value::Object(nested));
                }
            }
            Some(_) => {}
        }
    }
    patch
}

fn merge_into(target: &mut Map<String, Value>, other: Map<String, Value>) {
    for (key, value) in other {
        match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(nested)) => merge_into(existing, nested),
            (Some(_), _) => {}
            (None, value) => {
                target.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_no_change_is_empty() {
        let desired = json!({"data": {"k": "v1"}, "metadata": {"name": "a"}});
        let live = json!({
            "data": {"k": "v1"},
            "metadata": {"name": "a", "uid": "1", "resourceVersion": "3"},
            "status": {"phase": "Active"}
        });
        let patch = three_way_merge_patch(Some(&desired), &desired, &live);
        assert!(is_empty_patch(&patch));
    }

    #[test]
    fn test_changed_and_added_fields() {
        let original = json!({"data": {"k": "v1"}});
        let desired = json!({"data": {"k": "v2", "n": "new"}, "spec": {"replicas": 2}});
        let live = json!({"data": {"k": "v1", "other": "kept"}});
        let patch = three_way_merge_patch(Some(&original), &desired, &live);
        assert_eq!(
            patch,
            json!({"data": {"k": "v2", "n": "new"}, "spec": {"replicas": 2}})
        );
    }

    #[test]
    fn test_removed_fields_are_deleted() {
        let original = json!({"data": {"k": "v1", "gone": "x"}, "extra": true});
        let desired = json!({"data": {"k": "v1"}});
        let live = json!({"data": {"k": "v1", "gone": "x", "theirs": "y"}, "extra": true});
        let patch = three_way_merge_patch(Some(&original), &desired, &live);
        assert_eq!(patch, json!({"data": {"gone": null}, "extra": null}));
    }

    #[test]
    fn test_deletion_skipped_when_already_absent() {
        let original = json!({"data": {"gone": "x"}});
        let desired = json!({"data": {}});
        let live = json!({"data": {}});
        assert!(is_empty_patch(&three_way_merge_patch(Some(&original), &desired, &live)));
    }

    #[test]
    fn test_without_original_nothing_is_deleted() {
        let desired = json!({"data": {"k": "v1"}});
        let live = json!({"data": {"k": "v1", "theirs": "y"}});
        assert!(is_empty_patch(&three_way_merge_patch(None, &desired, &live)));
    }

    #[test]
    fn test_arrays_replace_wholesale() {
        let desired = json!({"spec": {"ports": [80, 443]}});
        let live = json!({"spec": {"ports": [80]}});
        let patch = three_way_merge_patch(None, &desired, &live);
        assert_eq!(patch, json!({"spec": {"ports": [80, 443]}}));
    }

    #[test]
    fn test_explicit_null_removes() {
        let desired = json!({"spec": {"paused": null}});
        let live = json!({"spec": {"paused": true}});
        let patch = three_way_merge_patch(None, &desired, &live);
        assert_eq!(patch, json!({"spec": {"paused": null}}));

        let live = json!({"spec": {}});
        assert!(is_empty_patch(&three_way_merge_patch(None, &desired, &live)));
    }

    #[test]
    fn test_type_change_replaces() {
        let desired = json!({"spec": {"selector": "app=web"}});
        let live = json!({"spec": {"selector": {"app": "web"}}});
        let patch = three_way_merge_patch(None, &desired, &live);
        assert_eq!(patch, json!({"spec": {"selector": "app=web"}}));
    }

    #[test]
    fn test_patch_applied_to_live_reaches_desired() {
        let original = json!({"data": {"k": "v1", "old": "x"}});
        let desired = json!({"data": {"k": "v2"}, "metadata": {"labels": {"tier": "web"}}});
        let mut live = json!({
            "data": {"k": "v1", "old": "x", "theirs": "y"},
            "metadata": {"name": "a", "uid": "u"}
        });
        let patch = three_way_merge_patch(Some(&original), &desired, &live);
        json_patch::merge(&mut live, &patch);
        assert_eq!(
            live,
            json!({
                "data": {"k": "v2", "theirs": "y"},
                "metadata": {"name": "a", "uid": "u", "labels": {"tier": "web"}}
            })
        );
        assert!(is_empty_patch(&three_way_merge_patch(Some(&desired), &desired, &live)));
    }
}
