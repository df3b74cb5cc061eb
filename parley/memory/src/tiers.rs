use std::collections::VecDeque;

use uuid::Uuid;

use crate::entry::MemoryEntry;

/// Insertion-ordered buffer that hands back its oldest entry on overflow.
#[derive(Debug, Clone)]
pub struct BoundedTier {
    capacity: usize,
    entries: VecDeque<MemoryEntry>,
}

impl BoundedTier {
    /// Creates a tier holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    /// Maximum number of entries.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends an entry; returns the entry pushed out when the tier overflows.
    pub fn push(&mut self, entry: MemoryEntry) -> Option<MemoryEntry> {
        self.entries.push_back(entry);
        if self.entries.len() > self.capacity {
            self.entries.pop_front()
        } else {
            None
        }
    }

    /// Oldest-first iterator.
    pub fn iter(&self) -> impl Iterator<Item = &MemoryEntry> + '_ {
        self.entries.iter()
    }

    /// Looks up an entry by id.
    #[must_use]
    pub fn get(&self, id: &Uuid) -> Option<&MemoryEntry> {
        self.entries.iter().find(|entry| entry.id == *id)
    }

    /// Returns true when the entry lives in this tier.
    #[must_use]
    pub fn contains(&self, id: &Uuid) -> bool {
        self.get(id).is_some()
    }

    /// Cloned contents, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<MemoryEntry> {
        self.entries.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use indexmap::IndexSet;

    fn entry(message: &str) -> MemoryEntry {
        MemoryEntry {
            id: Uuid::new_v4(),
            user_id: "u".into(),
            message: message.into(),
            response: String::new(),
            timestamp: Utc::now(),
            sequence: 0,
            importance: 0.5,
            topics: IndexSet::new(),
            location: None,
        }
    }

    #[test]
    fn overflow_returns_oldest() {
        let mut tier = BoundedTier::new(2);
        assert!(tier.push(entry("a")).is_none());
        assert!(tier.push(entry("b")).is_none());
        let evicted = tier.push(entry("c")).unwrap();
        assert_eq!(evicted.message, "a");
        let kept: Vec<_> = tier.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(kept, vec!["b", "c"]);
        assert!(!tier.contains(&evicted.id));
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let mut tier = BoundedTier::new(0);
        assert_eq!(tier.capacity(), 1);
        tier.push(entry("a"));
        assert_eq!(tier.len(), 1);
    }
}
