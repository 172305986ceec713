//! Content fingerprints for change detection across sessions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 128-bit content fingerprint computed with XXH3.
///
/// Fingerprints are derived only from the bytes of a node's realized
/// content, never from memory identity, so the same bytes fingerprint the
/// same way in every process. Two values with equal fingerprints are
/// treated as identical.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint([u8; 16]);

impl Fingerprint {
    /// Computes the fingerprint of a byte slice using XXH3-128.
    pub fn of(data: &[u8]) -> Self {
        let hash = xxhash_rust::xxh3::xxh3_128(data);
        Self(hash.to_le_bytes())
    }

    /// Returns the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        assert_eq!(Fingerprint::of(b"x = 1"), Fingerprint::of(b"x = 1"));
    }

    #[test]
    fn different_inputs_differ() {
        assert_ne!(Fingerprint::of(b"x = 1"), Fingerprint::of(b"x = 2"));
    }

    #[test]
    fn empty_input_has_fingerprint() {
        let fp = Fingerprint::of(b"");
        assert_eq!(fp, Fingerprint::of(&[]));
        assert_ne!(fp, Fingerprint::of(b"\0"));
    }

    #[test]
    fn display_is_32_hex_chars() {
        let s = Fingerprint::of(b"test").to_string();
        assert_eq!(s.len(), 32);
        assert!(s.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn debug_abbreviated() {
        let s = format!("{:?}", Fingerprint::of(b"test"));
        assert!(s.starts_with("Fingerprint("));
        assert!(s.ends_with(")"));
    }

    #[test]
    fn serde_roundtrip() {
        let fp = Fingerprint::of(b"serde test");
        let json = serde_json::to_string(&fp).unwrap();
        let back: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(fp, back);
    }
}
