//! Least-recently-used ordering for evictable GPU resources.

use std::collections::{BTreeMap, HashMap};

use super::resource::ResourceId;

/// Access-ordered set of resource ids.
///
/// Every touch stamps the id with a fresh monotonic tick, so iteration from
/// the oldest tick is LRU order with no ties.
#[derive(Debug, Default)]
pub struct LruQueue {
    order: BTreeMap<u64, ResourceId>,
    ticks: HashMap<ResourceId, u64>,
    next_tick: u64,
}

impl LruQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `id` as most recently used, inserting it if absent.
    pub fn touch(&mut self, id: &ResourceId) {
        let tick = self.next_tick;
        self.next_tick += 1;
        if let Some(old) = self.ticks.insert(id.clone(), tick) {
            self.order.remove(&old);
        }
        self.order.insert(tick, id.clone());
    }

    pub fn remove(&mut self, id: &ResourceId) -> bool {
        match self.ticks.remove(id) {
            Some(tick) => {
                self.order.remove(&tick);
                true
            }
            None => false,
        }
    }

    /// Ids from least to most recently used.
    pub fn iter_oldest(&self) -> impl Iterator<Item = &ResourceId> {
        self.order.values()
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.ticks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.ticks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(queue: &LruQueue) -> Vec<&str> {
        queue.iter_oldest().map(|id| id.as_str()).collect()
    }

    #[test]
    fn touch_moves_to_most_recent() {
        let mut lru = LruQueue::new();
        lru.touch(&"a".into());
        lru.touch(&"b".into());
        lru.touch(&"c".into());
        lru.touch(&"a".into());
        assert_eq!(ids(&lru), ["b", "c", "a"]);
        assert_eq!(lru.len(), 3);
    }

    #[test]
    fn remove_drops_entry() {
        let mut lru = LruQueue::new();
        lru.touch(&"a".into());
        lru.touch(&"b".into());
        assert!(lru.remove(&"a".into()));
        assert!(!lru.remove(&"a".into()));
        assert_eq!(ids(&lru), ["b"]);
        assert!(!lru.contains(&"a".into()));
    }
}
