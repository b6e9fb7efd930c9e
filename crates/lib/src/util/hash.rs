//! Hashing utilities for fingerprints and flag signatures.
//!
//! This module provides:
//! - `ObjectHash`: A truncated 20-character hash of a serialized value
//! - `ContentHash`: A full 64-character hash of file contents
//! - `hash_file()`: Single file hashing
//! - `hash_bytes()`: Arbitrary byte hashing

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::consts::OBJ_HASH_PREFIX_LEN;

pub type HashError = serde_json::Error;

/// Truncated SHA-256 of a JSON-serialized value, e.g. `"a1b2c3d4e5f6789012ab"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectHash(pub String);

impl std::fmt::Display for ObjectHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Values whose JSON form identifies them, such as compile and link signatures.
///
/// Field order is part of the signature, so reordering struct fields changes every hash.
pub trait Hashable: Serialize {
  fn compute_hash(&self) -> Result<ObjectHash, HashError> {
    let digest = Sha256::digest(serde_json::to_vec(self)?);
    let mut hex = hex_digest(&digest);
    hex.truncate(OBJ_HASH_PREFIX_LEN);
    Ok(ObjectHash(hex))
  }
}

/// Full SHA-256 of file or buffer contents, 64 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Hash a file's contents, streaming it through the hasher.
pub fn hash_file(path: &Path) -> io::Result<ContentHash> {
  let mut file = fs::File::open(path)?;
  let mut hasher = Sha256::new();
  io::copy(&mut file, &mut hasher)?;
  Ok(ContentHash(hex_digest(&hasher.finalize())))
}

pub fn hash_bytes(data: &[u8]) -> ContentHash {
  ContentHash(hex_digest(&Sha256::digest(data)))
}

fn hex_digest(digest: &[u8]) -> String {
  digest.iter().map(|b| format!("{:02x}", b)).collect()
}
