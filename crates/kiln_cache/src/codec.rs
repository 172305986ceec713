//! Value encoding for derived nodes.
//!
//! Derived values are stored as bincode bytes, which are deterministic for a
//! given value and therefore safe to fingerprint. Inputs are stored as the
//! raw bytes the caller supplied.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes `value` with the standard bincode configuration.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, String> {
    bincode::serde::encode_to_vec(value, bincode::config::standard()).map_err(|e| e.to_string())
}

/// Decodes bytes produced by [`encode`].
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, String> {
    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map(|(value, _)| value)
        .map_err(|e| e.to_string())
}
