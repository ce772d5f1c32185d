//! # Round-Trip and Growth Tests
//!
//! End-to-end coverage of the public surface: typed accessors, persistence
//! across close/reopen, tombstone compaction via trim, and the doubling
//! growth policy.

use std::path::Path;
use std::sync::Arc;

use pagekv::{Store, SyncMode};
use tempfile::tempdir;

const PAGE_SIZE: usize = 4096;

fn open(dir: &Path, id: &str) -> Arc<Store> {
    pagekv::initialize(std::env::temp_dir().join(format!("pagekv-roundtrip-{}", std::process::id())));
    Store::builder(id).directory(dir).open().unwrap()
}

mod basic_roundtrip {
    use super::*;

    #[test]
    fn values_survive_close_and_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = open(dir.path(), "kv");
            assert!(store.set_i32("n", 42));
            assert!(store.set_string("s", "hello"));
            store.close();
        }

        let store = open(dir.path(), "kv");
        assert_eq!(store.get_i32("n", 0), 42);
        assert_eq!(store.get_string("s").as_deref(), Some("hello"));
        assert_eq!(store.count(), 2);
        store.close();
    }

    #[test]
    fn every_value_type_roundtrips() {
        let dir = tempdir().unwrap();
        let store = open(dir.path(), "types");

        assert!(store.set_bool("b", true));
        assert!(store.set_i32("i32", i32::MIN));
        assert!(store.set_i64("i64", i64::MAX));
        assert!(store.set_f32("f32", 1.5));
        assert!(store.set_f64("f64", -2.25));
        assert!(store.set_string("s", "héllo wörld"));
        assert!(store.set_bytes("bytes", &[0, 1, 2, 255]));
        let list = vec!["one".to_string(), "two".to_string(), String::new()];
        assert!(store.set_string_list("list", &list));

        store.close();
        let store = open(dir.path(), "types");

        assert!(store.get_bool("b", false));
        assert_eq!(store.get_i32("i32", 0), i32::MIN);
        assert_eq!(store.get_i64("i64", 0), i64::MAX);
        assert_eq!(store.get_f32("f32", 0.0), 1.5);
        assert_eq!(store.get_f64("f64", 0.0), -2.25);
        assert_eq!(store.get_string("s").as_deref(), Some("héllo wörld"));
        assert_eq!(store.get_bytes("bytes").as_deref(), Some(&[0u8, 1, 2, 255][..]));
        assert_eq!(store.get_string_list("list"), Some(list));
        store.close();
    }

    #[test]
    fn missing_keys_return_the_caller_default() {
        let dir = tempdir().unwrap();
        let store = open(dir.path(), "defaults");

        assert!(!store.get_bool("nope", false));
        assert_eq!(store.get_i32("nope", -7), -7);
        assert_eq!(store.get_f64("nope", 0.5), 0.5);
        assert_eq!(store.get_string("nope"), None);
        assert_eq!(store.get_bytes("nope"), None);
        store.close();
    }

    #[test]
    fn last_written_value_wins_across_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = open(dir.path(), "rewrite");
            for i in 0..50 {
                assert!(store.set_i32("counter", i));
            }
            store.close();
        }

        let store = open(dir.path(), "rewrite");
        assert_eq!(store.get_i32("counter", 0), 49);
        assert_eq!(store.count(), 1);
        store.close();
    }

    #[test]
    fn remove_makes_a_key_absent() {
        let dir = tempdir().unwrap();
        let store = open(dir.path(), "removal");

        assert!(store.set_string("keep", "a"));
        assert!(store.set_string("drop", "b"));
        store.remove("drop");

        assert_eq!(store.get_string("drop"), None);
        assert!(!store.contains_key("drop"));
        assert_eq!(store.count(), 1);

        store.close();
        let store = open(dir.path(), "removal");
        assert_eq!(store.count(), 1);
        assert!(store.contains_key("keep"));
        store.close();
    }

    #[test]
    fn clear_all_leaves_an_empty_one_page_store() {
        let dir = tempdir().unwrap();
        let store = open(dir.path(), "cleared");

        for i in 0..200 {
            assert!(store.set_string(&format!("key-{}", i), "some value here"));
        }
        store.clear_all();

        assert_eq!(store.count(), 0);
        assert_eq!(store.total_size(), PAGE_SIZE);
        assert!(store.set_string("fresh", "start"));
        assert_eq!(store.get_string("fresh").as_deref(), Some("start"));
        store.close();
    }
}

mod tombstone_compaction {
    use super::*;

    #[test]
    fn trim_compacts_away_removed_keys() {
        let dir = tempdir().unwrap();
        let store = open(dir.path(), "trimmed");

        for i in 0..1000 {
            assert!(store.set_string(&format!("k{}", i), "x"));
        }
        let size_before = store.total_size();

        let doomed: Vec<String> = (0..900).map(|i| format!("k{}", i)).collect();
        store.remove_many(&doomed);
        store.trim();

        assert_eq!(store.count(), 100);
        assert!(store.total_size() < size_before);
        store.close();

        let store = open(dir.path(), "trimmed");
        assert_eq!(store.count(), 100);
        let mut keys = store.all_keys();
        keys.sort();
        let mut expected: Vec<String> = (900..1000).map(|i| format!("k{}", i)).collect();
        expected.sort();
        assert_eq!(keys, expected);
        store.close();
    }

    #[test]
    fn trim_on_an_empty_store_resets_to_one_page() {
        let dir = tempdir().unwrap();
        let store = open(dir.path(), "trim-empty");

        for i in 0..500 {
            assert!(store.set_string(&format!("k{}", i), "some payload"));
        }
        let keys: Vec<String> = (0..500).map(|i| format!("k{}", i)).collect();
        store.remove_many(&keys);
        store.trim();

        assert_eq!(store.count(), 0);
        assert_eq!(store.total_size(), PAGE_SIZE);
        store.close();
    }

    #[test]
    fn remove_many_with_one_key_appends_a_tombstone() {
        let dir = tempdir().unwrap();
        let store = open(dir.path(), "single-remove");

        assert!(store.set_string("a", "1"));
        assert!(store.set_string("b", "2"));
        store.remove_many(&["a"]);

        assert_eq!(store.count(), 1);
        assert!(!store.contains_key("a"));
        store.close();
    }
}

mod growth_policy {
    use super::*;

    #[test]
    fn file_size_doubles_through_page_multiples() {
        let dir = tempdir().unwrap();
        let store = open(dir.path(), "growing");

        let payload = "v".repeat(64);
        let mut sizes = vec![store.total_size()];
        for i in 0..600 {
            assert!(store.set_string(&format!("item-{:04}", i), &payload));
            let size = store.total_size();
            if size != *sizes.last().unwrap() {
                sizes.push(size);
            }
        }

        assert!(*sizes.last().unwrap() > PAGE_SIZE, "store should have grown");
        for size in &sizes {
            assert_eq!(size % PAGE_SIZE, 0, "size {} is not a page multiple", size);
            assert!(
                (size / PAGE_SIZE).is_power_of_two(),
                "size {} is not a power-of-two page multiple",
                size
            );
        }
        for pair in sizes.windows(2) {
            assert!(pair[0] < pair[1], "file never shrinks implicitly");
        }
        store.close();
    }

    #[test]
    fn grown_store_reloads_completely() {
        let dir = tempdir().unwrap();
        let payload = "data".repeat(32);
        {
            let store = open(dir.path(), "grown");
            for i in 0..300 {
                assert!(store.set_string(&format!("item-{}", i), &payload));
            }
            store.sync(SyncMode::Sync);
            store.close();
        }

        let store = open(dir.path(), "grown");
        assert_eq!(store.count(), 300);
        assert_eq!(store.get_string("item-299").as_deref(), Some(payload.as_str()));
        store.close();
    }
}

mod registry_behavior {
    use super::*;

    #[test]
    fn reopening_a_live_id_returns_the_same_engine() {
        let dir = tempdir().unwrap();
        let first = open(dir.path(), "shared-engine");
        let second = open(dir.path(), "shared-engine");

        assert!(Arc::ptr_eq(&first, &second));

        assert!(first.set_i32("n", 9));
        assert_eq!(second.get_i32("n", 0), 9);
        first.close();
    }

    #[test]
    fn closed_stores_reload_from_disk() {
        let dir = tempdir().unwrap();
        let store = open(dir.path(), "closing");
        assert!(store.set_string("k", "v"));
        store.close();

        let reopened = open(dir.path(), "closing");
        assert!(!Arc::ptr_eq(&store, &reopened));
        assert_eq!(reopened.get_string("k").as_deref(), Some("v"));
        reopened.close();
    }

    #[test]
    fn same_id_in_different_directories_is_distinct() {
        let dir_a = tempdir().unwrap();
        let dir_b = tempdir().unwrap();

        let a = open(dir_a.path(), "kv");
        let b = open(dir_b.path(), "kv");

        assert!(!Arc::ptr_eq(&a, &b));
        assert!(a.set_string("k", "from-a"));
        assert_eq!(b.get_string("k"), None);
        a.close();
        b.close();
    }
}
