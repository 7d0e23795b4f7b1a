use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::json_stringify_deterministic::to_deterministic_string;

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// sha256 over the deterministic JSON form of `value`.
pub fn sha256_json<T: Serialize>(value: &T) -> serde_json::Result<String> {
    let canonical = to_deterministic_string(value)?;
    Ok(sha256_hex(canonical.as_bytes()))
}
