//! # Identifier Encoding and File Naming
//!
//! A store identifier doubles as its file name, so identifiers containing
//! filesystem-special characters are stored under their md5 hex digest in a
//! dedicated subdirectory:
//!
//! ```text
//! <root>/<id>                          plain identifiers
//! <root>/specialCharacter/<md5(id)>    identifiers with \ / : * ? " < > |
//! <root>/<encoded>.crc                 meta file, next to its data file
//! ```
//!
//! The process registry is keyed by the canonical store key: the identifier
//! itself, or `md5(<dir>/<id>)` when the store lives in a directory other
//! than the process root (two stores with the same id in different
//! directories are distinct engines).

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};

use crate::config::{META_FILE_SUFFIX, SPECIAL_CHARACTERS, SPECIAL_CHARACTER_DIR};

pub fn md5_hex(input: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(input);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

pub fn has_special_characters(id: &str) -> bool {
    id.chars().any(|c| SPECIAL_CHARACTERS.contains(&c))
}

/// File-system form of an identifier: the identifier itself, or
/// `specialCharacter/<md5(id)>` when it cannot be a file name.
pub fn encode_store_id(id: &str) -> String {
    if has_special_characters(id) {
        format!("{}/{}", SPECIAL_CHARACTER_DIR, md5_hex(id.as_bytes()))
    } else {
        id.to_string()
    }
}

/// Canonical registry key for an identifier, namespaced by directory when
/// the store lives outside the process root.
pub fn store_key(id: &str, directory: Option<&Path>, root: Option<&Path>) -> String {
    match directory {
        Some(dir) if root != Some(dir) => {
            md5_hex(format!("{}/{}", dir.display(), id).as_bytes())
        }
        _ => id.to_string(),
    }
}

pub fn data_file_path(directory: &Path, id: &str) -> PathBuf {
    directory.join(encode_store_id(id))
}

pub fn meta_file_path(data_path: &Path) -> PathBuf {
    let mut os = data_path.as_os_str().to_os_string();
    os.push(META_FILE_SUFFIX);
    PathBuf::from(os)
}
