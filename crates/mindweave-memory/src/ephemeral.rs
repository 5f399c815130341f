//! Bounded in-process entry store with least-recently-used eviction.

use chrono::{DateTime, Utc};
use mindweave_types::index::{EntryId, IndexEntry};
use std::collections::HashMap;

struct Slot {
    entry: IndexEntry,
    /// Monotonic touch counter, breaks ties between identical timestamps.
    tick: u64,
}

/// Fixed-capacity entry store. When full, an insertion evicts the entry with
/// the oldest `last_accessed_at` (then oldest `created_at`, then least
/// recently touched).
pub struct EphemeralStore {
    slots: HashMap<EntryId, Slot>,
    max_entries: usize,
    clock: u64,
}

impl EphemeralStore {
    /// Create a store holding at most `max_entries` entries (at least 1).
    pub fn new(max_entries: usize) -> Self {
        Self {
            slots: HashMap::new(),
            max_entries: max_entries.max(1),
            clock: 0,
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Capacity.
    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Whether an entry exists.
    pub fn contains(&self, id: &EntryId) -> bool {
        self.slots.contains_key(id)
    }

    /// Look up an entry without recording an access.
    pub fn peek(&self, id: &EntryId) -> Option<&IndexEntry> {
        self.slots.get(id).map(|s| &s.entry)
    }

    /// Mutable access without recording an access.
    pub fn peek_mut(&mut self, id: &EntryId) -> Option<&mut IndexEntry> {
        self.slots.get_mut(id).map(|s| &mut s.entry)
    }

    /// Record an access and return the updated entry.
    pub fn touch(&mut self, id: &EntryId, now: DateTime<Utc>) -> Option<&IndexEntry> {
        let tick = self.next_tick();
        let slot = self.slots.get_mut(id)?;
        slot.entry.last_accessed_at = now;
        slot.entry.access_count = slot.entry.access_count.saturating_add(1);
        slot.tick = tick;
        Some(&slot.entry)
    }

    /// Insert or replace an entry, returning whatever was evicted to make room.
    pub fn insert(&mut self, entry: IndexEntry) -> Vec<IndexEntry> {
        let mut evicted = Vec::new();
        if !self.slots.contains_key(&entry.id) {
            while self.slots.len() >= self.max_entries {
                match self.lru_id() {
                    Some(victim) => {
                        if let Some(slot) = self.slots.remove(&victim) {
                            evicted.push(slot.entry);
                        }
                    }
                    None => break,
                }
            }
        }
        let tick = self.next_tick();
        self.slots.insert(entry.id.clone(), Slot { entry, tick });
        evicted
    }

    fn lru_id(&self) -> Option<EntryId> {
        self.slots
            .values()
            .min_by(|a, b| {
                a.entry
                    .last_accessed_at
                    .cmp(&b.entry.last_accessed_at)
                    .then_with(|| a.entry.created_at.cmp(&b.entry.created_at))
                    .then_with(|| a.tick.cmp(&b.tick))
            })
            .map(|s| s.entry.id.clone())
    }

    /// Remove an entry.
    pub fn remove(&mut self, id: &EntryId) -> Option<IndexEntry> {
        self.slots.remove(id).map(|s| s.entry)
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// All entries, in no particular order.
    pub fn entries(&self) -> impl Iterator<Item = &IndexEntry> + '_ {
        self.slots.values().map(|s| &s.entry)
    }

    /// Whether any entry other than `except` holds `content`.
    pub fn holds_content(&self, content: &str, except: &EntryId) -> bool {
        self.slots
            .values()
            .any(|s| &s.entry.id != except && s.entry.content == content)
    }
}
