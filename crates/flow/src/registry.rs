//! Ordered, ref-counted value store.
//!
//! The registry maps keys to [`DataBox`]es with a remaining-reads count.
//! The scheduler stores each filter's output with a count equal to its
//! downstream consumption and every fetch decrements; the entry is
//! released the moment the last consumer has read it.
//!
//! Re-adding an existing key pushes a *shadowing* entry: fetches see the
//! newest, removals pop newest first. The expression cache leans on this
//! to keep a history of named results.
//!
//! `reset` releases entries in reverse insertion order, so borrowed
//! entries referring to earlier entries are freed first.

use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::data::DataBox;
use crate::error::{FlowError, Result};

/// Remaining-reads policy for an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reads {
    /// Never auto-freed; fetches do not decrement. Used for the published
    /// dataset and the evaluator's ambient tables.
    Pinned,
    /// Freed when the count reaches zero.
    Count(u32),
}

#[derive(Debug)]
struct Entry {
    key: String,
    data: DataBox,
    reads: Reads,
}

/// Insertion-ordered, ref-counted storage.
///
/// Entries live in an append-only arena indexed by a per-key stack of
/// live positions, so shadowing and LIFO release both fall out of the
/// arena order.
#[derive(Debug, Default)]
pub struct Registry {
    entries: Vec<Option<Entry>>,
    index: IndexMap<String, Vec<usize>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value under `key`, shadowing any existing entry.
    pub fn add(&mut self, key: impl Into<String>, data: DataBox, reads: Reads) {
        let key = key.into();
        trace!(key = %key, ?reads, "registry add");
        let slot = self.entries.len();
        self.entries.push(Some(Entry {
            key: key.clone(),
            data,
            reads,
        }));
        self.index.entry(key).or_default().push(slot);
    }

    /// Check for a live entry under `key`.
    pub fn has(&self, key: &str) -> bool {
        self.index.get(key).is_some_and(|stack| !stack.is_empty())
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.index.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch the newest entry for `key`, consuming one read.
    ///
    /// Counted entries are removed when the count reaches zero; the
    /// returned handle stays valid until the caller drops it. Pinned
    /// entries never decrement.
    pub fn fetch(&mut self, key: &str) -> Result<DataBox> {
        let slot = self.top_slot(key)?;
        let entry = self.entries[slot]
            .as_mut()
            .expect("indexed registry slot is live");
        match entry.reads {
            Reads::Pinned => Ok(entry.data.clone()),
            Reads::Count(0) => Err(FlowError::Exhausted(key.to_string())),
            Reads::Count(1) => {
                trace!(key, "registry fetch, last read, releasing");
                let entry = self.entries[slot].take().expect("slot checked live");
                self.unindex(key, slot);
                Ok(entry.data)
            }
            Reads::Count(n) => {
                entry.reads = Reads::Count(n - 1);
                trace!(key, remaining = n - 1, "registry fetch");
                Ok(entry.data.clone())
            }
        }
    }

    /// Borrow the newest entry without consuming a read.
    pub fn peek(&self, key: &str) -> Option<&DataBox> {
        let slot = *self.index.get(key)?.last()?;
        self.entries[slot].as_ref().map(|e| &e.data)
    }

    /// Remaining reads of the newest entry, if present.
    pub fn reads(&self, key: &str) -> Option<Reads> {
        let slot = *self.index.get(key)?.last()?;
        self.entries[slot].as_ref().map(|e| e.reads)
    }

    /// Force removal of the newest entry for `key`.
    pub fn remove(&mut self, key: &str) -> Result<()> {
        let slot = self.top_slot(key)?;
        self.entries[slot] = None;
        self.unindex(key, slot);
        Ok(())
    }

    /// Live entries in insertion order, with their read state.
    pub fn live(&self) -> impl Iterator<Item = (&str, Reads)> {
        self.entries
            .iter()
            .filter_map(|slot| slot.as_ref().map(|e| (e.key.as_str(), e.reads)))
    }

    /// High-water mark for [`Registry::release_since`].
    pub fn mark(&self) -> usize {
        self.entries.len()
    }

    /// Release every entry added at or after `mark`, newest first.
    ///
    /// This is the scheduler's unwind path: a failed execution drops the
    /// results it produced, in reverse insertion order, and leaves
    /// everything published earlier untouched.
    pub fn release_since(&mut self, mark: usize) {
        for slot in (mark..self.entries.len()).rev() {
            if let Some(entry) = self.entries[slot].take() {
                debug!(key = %entry.key, "registry unwind release");
                let key = entry.key.clone();
                drop(entry);
                self.unindex(&key, slot);
            }
        }
        self.entries.truncate(mark);
    }

    /// Release all entries in reverse insertion order.
    pub fn reset(&mut self) {
        for slot in (0..self.entries.len()).rev() {
            self.entries[slot] = None;
        }
        self.entries.clear();
        self.index.clear();
    }

    fn top_slot(&self, key: &str) -> Result<usize> {
        self.index
            .get(key)
            .and_then(|stack| stack.last().copied())
            .ok_or_else(|| FlowError::MissingEntry(key.to_string()))
    }

    fn unindex(&mut self, key: &str, slot: usize) {
        if let Some(stack) = self.index.get_mut(key) {
            stack.retain(|&s| s != slot);
            if stack.is_empty() {
                self.index.shift_remove(key);
            }
        }
    }
}
