#![cfg(feature = "serde")]

//! Integration tests for serde support of the persistent maps.

use immap::persistent::{ImHashMap, ImMap};
use rstest::rstest;

// =============================================================================
// ImMap Integration Tests
// =============================================================================

#[rstest]
fn test_im_map_json_roundtrip() {
    let map: ImMap<String> = (-5..=5).map(|key| (key, format!("value{key}"))).collect();
    let json = serde_json::to_string(&map).unwrap();
    let restored: ImMap<String> = serde_json::from_str(&json).unwrap();
    assert_eq!(map, restored);
}

#[rstest]
fn test_im_map_serializes_in_key_order() {
    let map = ImMap::new()
        .add_or_update(5, "a")
        .add_or_update(3, "b")
        .add_or_update(8, "c");
    let json = serde_json::to_string(&map).unwrap();
    assert_eq!(json, r#"{"3":"b","5":"a","8":"c"}"#);
}

#[rstest]
fn test_im_map_empty() {
    let map: ImMap<i32> = ImMap::new();
    let json = serde_json::to_string(&map).unwrap();
    assert_eq!(json, "{}");
    let restored: ImMap<i32> = serde_json::from_str(&json).unwrap();
    assert!(restored.is_empty());
}

#[rstest]
fn test_im_map_rejects_non_integer_keys() {
    let result: Result<ImMap<i32>, _> = serde_json::from_str(r#"{"x":1}"#);
    assert!(result.is_err());
}

// =============================================================================
// ImHashMap Integration Tests
// =============================================================================

#[rstest]
fn test_im_hash_map_json_roundtrip() {
    let map: ImHashMap<String, Vec<i32>> = (0..20)
        .map(|index| (format!("key{index}"), vec![index; 3]))
        .collect();
    let json = serde_json::to_string(&map).unwrap();
    let restored: ImHashMap<String, Vec<i32>> = serde_json::from_str(&json).unwrap();
    assert_eq!(map, restored);
}

#[rstest]
fn test_nested_maps() {
    let inner: ImMap<bool> = [(1, true), (2, false)].into_iter().collect();
    let outer: ImHashMap<String, ImMap<bool>> =
        ImHashMap::new().add_or_update("flags".to_string(), inner.clone());
    let json = serde_json::to_string(&outer).unwrap();
    let restored: ImHashMap<String, ImMap<bool>> = serde_json::from_str(&json).unwrap();
    assert_eq!(restored.try_find("flags"), Some(&inner));
}
