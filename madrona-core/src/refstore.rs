//! Content-addressed blob store contract.
//!
//! State trees reference large binary objects by hash (`ref:<hex>` link
//! values) instead of inlining them; the blobs themselves live in a ref
//! store the core only consumes through this seam.

use madrona_model::RefHash;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RefStoreError {
    #[error("blob {0} not found")]
    NotFound(RefHash),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub trait RefStore: Send + Sync {
    /// Store a blob, returning its content address and size.
    fn add(&self, reader: &mut dyn Read) -> Result<(RefHash, u64), RefStoreError>;

    /// A reader over the blob with the given address.
    fn get(&self, hash: &RefHash) -> Result<Box<dyn Read + Send>, RefStoreError>;

    fn contains(&self, hash: &RefHash) -> bool;
}

/// Hash a blob's bytes into its content address.
pub fn ref_hash(bytes: &[u8]) -> RefHash {
    RefHash::from(*blake3::hash(bytes).as_bytes())
}

/// In-memory ref store, used by tests and demos.
#[derive(Clone, Default)]
pub struct MemoryRefStore {
    blobs: Arc<Mutex<HashMap<RefHash, Arc<Vec<u8>>>>>,
}

impl MemoryRefStore {
    pub fn new() -> MemoryRefStore {
        MemoryRefStore::default()
    }
}

impl RefStore for MemoryRefStore {
    fn add(&self, reader: &mut dyn Read) -> Result<(RefHash, u64), RefStoreError> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        let hash = ref_hash(&bytes);
        let size = bytes.len() as u64;
        if let Ok(mut blobs) = self.blobs.lock() {
            blobs.insert(hash, Arc::new(bytes));
        }
        Ok((hash, size))
    }

    fn get(&self, hash: &RefHash) -> Result<Box<dyn Read + Send>, RefStoreError> {
        let blob = match self.blobs.lock() {
            Ok(blobs) => blobs.get(hash).cloned(),
            Err(_) => None,
        };
        match blob {
            Some(blob) => Ok(Box::new(Cursor::new(blob.as_ref().clone()))),
            None => Err(RefStoreError::NotFound(*hash)),
        }
    }

    fn contains(&self, hash: &RefHash) -> bool {
        self.blobs
            .lock()
            .map(|blobs| blobs.contains_key(hash))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_get_round_trip() {
        let store = MemoryRefStore::new();
        let payload = b"some file contents";

        let (hash, size) = store.add(&mut &payload[..]).unwrap();
        assert_eq!(size, payload.len() as u64);
        assert!(store.contains(&hash));

        let mut read_back = Vec::new();
        store.get(&hash).unwrap().read_to_end(&mut read_back).unwrap();
        assert_eq!(read_back, payload);
    }

    #[test]
    fn test_same_content_same_address() {
        let store = MemoryRefStore::new();
        let (h1, _) = store.add(&mut &b"abc"[..]).unwrap();
        let (h2, _) = store.add(&mut &b"abc"[..]).unwrap();
        let (h3, _) = store.add(&mut &b"abd"[..]).unwrap();
        assert_eq!(h1, h2);
        assert_ne!(h1, h3);
    }

    #[test]
    fn test_missing_blob() {
        let store = MemoryRefStore::new();
        let missing = ref_hash(b"never added");
        assert!(!store.contains(&missing));
        assert!(matches!(
            store.get(&missing),
            Err(RefStoreError::NotFound(_))
        ));
    }
}
