//! # Encryption Tests
//!
//! The AES-CFB filter through the public surface: encrypted round-trips,
//! appends continuing the cipher stream, compaction under a fresh IV, and
//! every `re_key` transition (enable, rotate, disable). A wrong key must
//! never serve garbage: the decoded stream fails validation and the store
//! refuses through the recovery strategy.

use std::path::Path;
use std::sync::Arc;

use pagekv::{Store, SyncMode};
use tempfile::tempdir;

const KEY: &[u8] = b"passw0rd12345678";
const OTHER_KEY: &[u8] = b"an0ther-key-here";

fn open(dir: &Path, id: &str, key: Option<&[u8]>) -> Arc<Store> {
    pagekv::initialize(std::env::temp_dir().join(format!("pagekv-crypt-{}", std::process::id())));
    let mut builder = Store::builder(id).directory(dir);
    if let Some(key) = key {
        builder = builder.crypt_key(key);
    }
    builder.open().unwrap()
}

mod encrypted_roundtrip {
    use super::*;

    #[test]
    fn values_survive_reopen_with_the_same_key() {
        let dir = tempdir().unwrap();
        {
            let store = open(dir.path(), "vault", Some(KEY));
            assert!(store.set_string("s", "secret value"));
            assert!(store.set_i64("n", 1 << 40));
            store.sync(SyncMode::Sync);
            store.close();
        }

        let store = open(dir.path(), "vault", Some(KEY));
        assert_eq!(store.get_string("s").as_deref(), Some("secret value"));
        assert_eq!(store.get_i64("n", 0), 1 << 40);
        assert_eq!(store.count(), 2);
        store.close();
    }

    #[test]
    fn plaintext_never_reaches_the_data_file() {
        let dir = tempdir().unwrap();
        let store = open(dir.path(), "opaque", Some(KEY));
        assert!(store.set_string("k", "finding-this-means-plaintext"));
        store.sync(SyncMode::Sync);
        store.close();

        let bytes = std::fs::read(dir.path().join("opaque")).unwrap();
        let needle = b"finding-this-means-plaintext";
        let found = bytes.windows(needle.len()).any(|window| window == needle);
        assert!(!found, "value must be stored as ciphertext");
    }

    #[test]
    fn appends_continue_the_cipher_stream() {
        let dir = tempdir().unwrap();
        {
            let store = open(dir.path(), "stream", Some(KEY));
            // First set compacts; everything after appends mid-stream.
            for i in 0..50 {
                assert!(store.set_string(&format!("key-{}", i), &format!("value-{}", i)));
            }
            store.close();
        }

        let store = open(dir.path(), "stream", Some(KEY));
        assert_eq!(store.count(), 50);
        for i in 0..50 {
            assert_eq!(
                store.get_string(&format!("key-{}", i)).as_deref(),
                Some(format!("value-{}", i).as_str())
            );
        }
        store.close();
    }

    #[test]
    fn encrypted_compaction_and_growth_roundtrip() {
        let dir = tempdir().unwrap();
        let payload = "p".repeat(100);
        {
            let store = open(dir.path(), "busy", Some(KEY));
            for i in 0..200 {
                assert!(store.set_string(&format!("key-{}", i), &payload));
            }
            let doomed: Vec<String> = (0..150).map(|i| format!("key-{}", i)).collect();
            store.remove_many(&doomed);
            store.trim();
            store.close();
        }

        let store = open(dir.path(), "busy", Some(KEY));
        assert_eq!(store.count(), 50);
        assert_eq!(store.get_string("key-199").as_deref(), Some(payload.as_str()));
        store.close();
    }
}

mod rekey_transitions {
    use super::*;

    #[test]
    fn enabling_encryption_on_a_plain_store() {
        let dir = tempdir().unwrap();
        {
            let store = open(dir.path(), "upgrade", None);
            for i in 0..10 {
                assert!(store.set_string(&format!("k{}", i), "plain"));
            }
            assert!(store.re_key(Some(KEY)));
            assert_eq!(store.crypt_key().as_deref(), Some(KEY));
            store.close();
        }

        let store = open(dir.path(), "upgrade", Some(KEY));
        assert_eq!(store.count(), 10);
        for i in 0..10 {
            assert_eq!(store.get_string(&format!("k{}", i)).as_deref(), Some("plain"));
        }
        store.close();
    }

    #[test]
    fn rotating_the_key_rewrites_under_the_new_one() {
        let dir = tempdir().unwrap();
        {
            let store = open(dir.path(), "rotate", Some(KEY));
            assert!(store.set_string("k", "v"));
            assert!(store.re_key(Some(OTHER_KEY)));
            store.close();
        }

        let store = open(dir.path(), "rotate", Some(OTHER_KEY));
        assert_eq!(store.get_string("k").as_deref(), Some("v"));
        store.close();
    }

    #[test]
    fn disabling_encryption_decrypts_to_plaintext() {
        let dir = tempdir().unwrap();
        {
            let store = open(dir.path(), "downgrade", Some(KEY));
            assert!(store.set_string("k", "now public"));
            assert!(store.re_key(None));
            assert_eq!(store.crypt_key(), None);
            store.close();
        }

        let store = open(dir.path(), "downgrade", None);
        assert_eq!(store.get_string("k").as_deref(), Some("now public"));
        store.close();
    }

    #[test]
    fn rekey_to_the_same_key_is_a_no_op() {
        let dir = tempdir().unwrap();
        let store = open(dir.path(), "same-key", Some(KEY));
        assert!(store.set_string("k", "v"));
        assert!(store.re_key(Some(KEY)));
        assert_eq!(store.get_string("k").as_deref(), Some("v"));
        store.close();
    }
}

mod wrong_key {
    use super::*;

    #[test]
    fn reopening_with_the_wrong_key_refuses_to_serve_garbage() {
        let dir = tempdir().unwrap();
        {
            let store = open(dir.path(), "locked", Some(KEY));
            for i in 0..5 {
                assert!(store.set_string(&format!("k{}", i), "confidential"));
            }
            store.sync(SyncMode::Sync);
            store.close();
        }

        // The ciphertext CRC still validates; the decoded stream does not.
        let store = open(dir.path(), "locked", Some(OTHER_KEY));
        assert_eq!(store.count(), 0, "wrong key must not expose data");
        for i in 0..5 {
            assert_eq!(store.get_string(&format!("k{}", i)), None);
        }
        store.close();
    }
}
