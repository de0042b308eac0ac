use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{info, warn};

use crate::capabilities::kv::{KvError, LocalStorage, TypedKvStore};
use crate::model::{HistoryEntry, HistoryId};
use crate::reference_store::StoreError;
use crate::{Confirmation, HISTORY_CAPACITY, HISTORY_STORAGE_KEY};

/// Submitted and drafted requests, newest first, bounded to `capacity`.
pub struct HistoryLog<S: LocalStorage> {
    storage: Arc<S>,
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl<S: LocalStorage> HistoryLog<S> {
    pub fn load(storage: Arc<S>) -> Self {
        Self::load_with_capacity(storage, HISTORY_CAPACITY)
    }

    /// Unreadable history is discarded rather than blocking startup.
    pub fn load_with_capacity(storage: Arc<S>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut entries = match store().and_then(|s| s.load(storage.as_ref())) {
            Ok(Some(entries)) => entries,
            Ok(None) => VecDeque::new(),
            Err(e) => {
                warn!(error = %e, "unreadable history, starting empty");
                VecDeque::new()
            }
        };
        entries.truncate(capacity);
        Self {
            storage,
            entries,
            capacity,
        }
    }

    #[must_use]
    pub fn entries(&self) -> &VecDeque<HistoryEntry> {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: HistoryId) -> Option<&HistoryEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Adds at the front. Returns the entry evicted to stay within capacity, if any.
    pub fn add(&mut self, entry: HistoryEntry) -> Result<Option<HistoryEntry>, StoreError> {
        let snapshot = self.entries.clone();
        self.entries.push_front(entry);
        let evicted = if self.entries.len() > self.capacity {
            self.entries.pop_back()
        } else {
            None
        };
        self.commit(snapshot)?;
        Ok(evicted)
    }

    pub fn remove(&mut self, id: HistoryId) -> Result<HistoryEntry, StoreError> {
        let index = self
            .entries
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| history_not_found(id))?;
        let snapshot = self.entries.clone();
        let removed = self.entries.remove(index);
        self.commit(snapshot)?;
        removed.ok_or_else(|| history_not_found(id))
    }

    pub fn clear(&mut self, confirmation: Confirmation) -> Result<usize, StoreError> {
        if !confirmation.is_confirmed() {
            return Ok(0);
        }
        let snapshot = std::mem::take(&mut self.entries);
        let count = snapshot.len();
        self.commit(snapshot)?;
        info!(count, "history cleared");
        Ok(count)
    }

    fn commit(&mut self, snapshot: VecDeque<HistoryEntry>) -> Result<(), StoreError> {
        let saved = store().and_then(|s| s.save(self.storage.as_ref(), &self.entries));
        if let Err(e) = saved {
            warn!(error = %e, "rolling back history change");
            self.entries = snapshot;
            return Err(e.into());
        }
        Ok(())
    }
}

fn store() -> Result<TypedKvStore<VecDeque<HistoryEntry>>, KvError> {
    TypedKvStore::named(HISTORY_STORAGE_KEY)
}

fn history_not_found(id: HistoryId) -> StoreError {
    StoreError::HistoryNotFound(id.to_string())
}
