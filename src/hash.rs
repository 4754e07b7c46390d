//! Hashing utilities: compact key fingerprints for spill indexes and
//! resolved-key tracking

use crate::model::{KeyPart, RowKey};
use blake3::Hasher;
use serde::{Deserialize, Serialize};
use std::fmt;

/// First 16 bytes of the blake3 digest of a key's canonical encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyFingerprint(pub [u8; 16]);

impl KeyFingerprint {
    pub fn of(key: &RowKey) -> Self {
        let mut hasher = Hasher::new();
        for part in &key.0 {
            match part {
                KeyPart::Null => {
                    hasher.update(b"n");
                }
                KeyPart::Int(i) => {
                    hasher.update(b"i");
                    hasher.update(&i.to_le_bytes());
                }
                KeyPart::Float(f) => {
                    hasher.update(b"f");
                    hasher.update(&f.to_bits().to_le_bytes());
                }
                KeyPart::Text(s) => {
                    hasher.update(b"s");
                    hasher.update(&(s.len() as u64).to_le_bytes());
                    hasher.update(s.as_bytes());
                }
            }
            hasher.update(b"|"); // Separator to avoid hash collisions
        }
        let digest = hasher.finalize();
        let mut out = [0u8; 16];
        out.copy_from_slice(&digest.as_bytes()[..16]);
        Self(out)
    }

    /// Number of distinct `partition` levels
    pub const LEVELS: usize = 4;

    /// Stable bucket for hash partitioning. Each level reads a different
    /// 4-byte slice, so re-splitting a bucket at the next level spreads it.
    pub fn partition(&self, level: usize, partitions: usize) -> usize {
        let start = (level % Self::LEVELS) * 4;
        let mut slice = [0u8; 4];
        slice.copy_from_slice(&self.0[start..start + 4]);
        (u32::from_le_bytes(slice) as u64 % partitions.max(1) as u64) as usize
    }
}

impl fmt::Display for KeyFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Hash of a column list, used to compare headers of bundled files
pub fn hash_column_names(names: &[String]) -> String {
    let mut hasher = Hasher::new();
    for name in names {
        hasher.update(name.as_bytes());
        hasher.update(b"|");
    }
    hasher.finalize().to_hex().to_string()
}
