//! In-memory key-value store.
//!
//! Owned by the reactor and handed to command dispatch by `&mut`. All
//! access happens on the event loop thread, so there is no interior locking.

use bytes::Bytes;
use std::collections::HashMap;
use tracing::{debug, trace};

/// Store statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub item_count: usize,
    /// Bytes held by keys and values, excluding map overhead.
    pub data_bytes: usize,
}

/// Mapping from key to value with unconditional overwrite.
#[derive(Debug, Default)]
pub struct Store {
    data: HashMap<Bytes, Bytes>,
    data_bytes: usize,
}

impl Store {
    /// Create an empty store
    pub fn new() -> Self {
        debug!("Initializing store");
        Self::default()
    }

    /// Look up a key.
    pub fn get(&self, key: &[u8]) -> Option<&Bytes> {
        self.data.get(key)
    }

    /// Insert or overwrite a key.
    pub fn set(&mut self, key: Bytes, value: Bytes) {
        let added = key.len() + value.len();
        if let Some(old) = self.data.insert(key.clone(), value) {
            self.data_bytes -= key.len() + old.len();
        }
        self.data_bytes += added;

        trace!(
            key = %String::from_utf8_lossy(&key),
            items = self.data.len(),
            data_bytes = self.data_bytes,
            "Stored item"
        );
    }

    /// Remove a key if present. Returns whether anything was removed.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        match self.data.remove_entry(key) {
            Some((key, value)) => {
                self.data_bytes -= key.len() + value.len();
                trace!(key = %String::from_utf8_lossy(&key), "Deleted item");
                true
            }
            None => false,
        }
    }

    /// Number of stored items.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the store holds no items.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get store statistics
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            item_count: self.data.len(),
            data_bytes: self.data_bytes,
        }
    }
}
