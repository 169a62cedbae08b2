//! Feature hashing of behavioral tokens into a bounded index space.

use std::sync::atomic::{AtomicBool, Ordering};

use ahash::{AHashMap, AHashSet};
use log::{debug, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{MalheurError, Result};

/// Default size of the feature index space (2^20 dimensions).
pub const DEFAULT_CAPACITY: usize = 1 << 20;

/// Largest supported index space; indices are stored as `u32`.
pub const MAX_CAPACITY: u64 = 1 << 32;

const SECOND_SEED: u32 = 0x9e37_79b9;

/// Deterministic 64-bit hash of a token, independent of platform and run.
fn hash_token(token: &str) -> u64 {
    let bytes = token.as_bytes();
    let high = crc32fast::hash(bytes) as u64;

    let mut hasher = crc32fast::Hasher::new_with_initial(SECOND_SEED);
    hasher.update(bytes);
    let low = hasher.finalize() as u64;

    (high << 32) | low
}

/// Maps tokens to feature indices in `[0, capacity)`.
///
/// Without a lookup table the mapping is a pure function of the token. With
/// a table, each new token claims a free slot by hash-and-probe and keeps it
/// for the lifetime of the hasher; once every slot is taken, further tokens
/// share their home slot with whatever token already owns it.
#[derive(Debug)]
pub struct FeatureHasher {
    capacity: usize,
    table: Option<FeatureTable>,
}

impl FeatureHasher {
    /// Create a stateless hasher over `capacity` dimensions.
    pub fn new(capacity: usize) -> Result<Self> {
        validate_capacity(capacity)?;
        Ok(Self {
            capacity,
            table: None,
        })
    }

    /// Create a hasher backed by a lookup table with `capacity` slots.
    pub fn with_table(capacity: usize) -> Result<Self> {
        validate_capacity(capacity)?;
        debug!("Initializing feature lookup table with {capacity} slots");
        Ok(Self {
            capacity,
            table: Some(FeatureTable::new(capacity)),
        })
    }

    /// Size of the index space.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether a lookup table backs this hasher.
    pub fn has_table(&self) -> bool {
        self.table.is_some()
    }

    /// The backing lookup table, if enabled.
    pub fn table(&self) -> Option<&FeatureTable> {
        self.table.as_ref()
    }

    /// Map a token to its feature index.
    pub fn index(&self, token: &str) -> u32 {
        let home = self.home_slot(token);
        match &self.table {
            Some(table) => table.claim(token, home),
            None => home,
        }
    }

    fn home_slot(&self, token: &str) -> u32 {
        (hash_token(token) % self.capacity as u64) as u32
    }
}

pub(crate) fn validate_capacity(capacity: usize) -> Result<()> {
    if capacity == 0 || capacity as u64 > MAX_CAPACITY {
        return Err(MalheurError::config(format!(
            "feature table capacity must be in [1, {MAX_CAPACITY}], got {capacity}"
        )));
    }
    Ok(())
}

/// Usage statistics of a [`FeatureTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStats {
    /// Number of slots.
    pub capacity: usize,
    /// Slots owned by a token.
    pub occupied: usize,
    /// Distinct tokens that arrived after the table was full and share an
    /// already owned slot.
    pub collisions: u64,
}

#[derive(Debug, Default)]
struct TableSlots {
    by_token: AHashMap<Box<str>, u32>,
    by_index: AHashMap<u32, Box<str>>,
    overflow: AHashSet<Box<str>>,
}

/// Fixed-capacity token lookup table with a reverse mapping for inspection.
///
/// Lookups of registered tokens take a shared lock; registering a new token
/// takes the exclusive lock, so slot claims are serialized.
#[derive(Debug)]
pub struct FeatureTable {
    capacity: usize,
    slots: RwLock<TableSlots>,
    exhausted: AtomicBool,
}

impl FeatureTable {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slots: RwLock::new(TableSlots::default()),
            exhausted: AtomicBool::new(false),
        }
    }

    fn claim(&self, token: &str, home: u32) -> u32 {
        {
            let slots = self.slots.read();
            if let Some(&index) = slots.by_token.get(token) {
                return index;
            }
            if slots.overflow.contains(token) {
                return home;
            }
        }

        let mut slots = self.slots.write();
        // Another thread may have registered the token in between.
        if let Some(&index) = slots.by_token.get(token) {
            return index;
        }

        if slots.by_index.len() >= self.capacity {
            slots.overflow.insert(token.into());
            if !self.exhausted.swap(true, Ordering::Relaxed) {
                warn!(
                    "Feature table exhausted ({} slots); further tokens share dimensions",
                    self.capacity
                );
            }
            return home;
        }

        let mut index = home;
        while slots.by_index.contains_key(&index) {
            index = ((index as u64 + 1) % self.capacity as u64) as u32;
        }

        slots.by_token.insert(token.into(), index);
        slots.by_index.insert(index, token.into());
        index
    }

    /// Token owning the given slot.
    pub fn token(&self, index: u32) -> Option<String> {
        self.slots
            .read()
            .by_index
            .get(&index)
            .map(|token| token.to_string())
    }

    /// Index assigned to a token, without registering it.
    pub fn lookup(&self, token: &str) -> Option<u32> {
        self.slots.read().by_token.get(token).copied()
    }

    /// Number of registered tokens.
    pub fn len(&self) -> usize {
        self.slots.read().by_index.len()
    }

    /// Whether no token has been registered yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current usage statistics.
    pub fn stats(&self) -> TableStats {
        let slots = self.slots.read();
        TableStats {
            capacity: self.capacity,
            occupied: slots.by_index.len(),
            collisions: slots.overflow.len() as u64,
        }
    }
}
