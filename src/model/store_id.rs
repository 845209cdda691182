//! Store identifiers

use super::Hash;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// 32-byte identifier of a key/value store
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StoreId([u8; 32]);

impl StoreId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        StoreId(bytes)
    }

    /// Generate a fresh identifier from wall-clock time, a process-wide
    /// counter and the process id
    pub fn generate() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let count = COUNTER.fetch_add(1, Ordering::Relaxed);
        let pid = std::process::id();
        let hash = Hash::digest_many(&[
            b"datalayer-store",
            &nanos.to_le_bytes(),
            &count.to_le_bytes(),
            &pid.to_le_bytes(),
        ]);
        StoreId(*hash.as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let hash = Hash::from_hex(s)?;
        Ok(StoreId(*hash.as_bytes()))
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoreId({})", &self.to_hex()[..7])
    }
}

impl std::str::FromStr for StoreId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StoreId::from_hex(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_unique() {
        let ids: std::collections::HashSet<_> = (0..1000).map(|_| StoreId::generate()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_hex_roundtrip() {
        let id = StoreId::generate();
        let parsed: StoreId = id.to_hex().parse().unwrap();
        assert_eq!(parsed, id);
    }
}
