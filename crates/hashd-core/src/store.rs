//! Write-once storage for committed digests.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::{HashError, HashResult};
use crate::RequestId;

/// Concurrent map from request identifier to committed digest.
///
/// Entries are inserted once and never changed or removed. The store only
/// knows about committed results; telling "not ready" apart from "unknown"
/// is the caller's job, using the allocator's issued range.
#[derive(Debug, Default)]
pub struct ResultStore {
    entries: DashMap<RequestId, String>,
    committed: AtomicU64,
}

impl ResultStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Commits the digest for `id`.
    ///
    /// The entry becomes visible before the committed count is incremented,
    /// so `committed()` never runs ahead of what readers can see.
    pub fn put(&self, id: RequestId, digest: String) -> HashResult<()> {
        match self.entries.entry(id) {
            Entry::Occupied(_) => Err(HashError::DuplicateKey(id)),
            Entry::Vacant(slot) => {
                slot.insert(digest);
                self.committed.fetch_add(1, Ordering::AcqRel);
                Ok(())
            }
        }
    }

    /// Returns the committed digest for `id`, if any.
    pub fn get(&self, id: RequestId) -> Option<String> {
        self.entries.get(&id).map(|entry| entry.value().clone())
    }

    /// Number of committed results.
    pub fn committed(&self) -> u64 {
        self.committed.load(Ordering::Acquire)
    }
}
