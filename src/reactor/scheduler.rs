//! Priority queue of frame providers.
//!
//! Lower priority values pop first; equal priorities pop in insertion order.
//! A provider queued with `single` is not queued again while it is waiting.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::sync::Arc;

use crate::stream::FrameProvider;

struct Entry {
    priority: u8,
    seq: u64,
    provider: Arc<dyn FrameProvider>,
}

impl Entry {
    fn key(&self) -> Reverse<(u8, u64)> {
        Reverse((self.priority, self.seq))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

fn identity(provider: &Arc<dyn FrameProvider>) -> usize {
    Arc::as_ptr(provider) as *const () as usize
}

/// Providers waiting to build a frame.
#[derive(Default)]
pub struct Scheduler {
    heap: BinaryHeap<Entry>,
    queued: HashSet<usize>,
    seq: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a provider. Returns `false` if `single` and it is already queued.
    pub fn push(&mut self, provider: Arc<dyn FrameProvider>, single: bool) -> bool {
        let id = identity(&provider);
        if single && self.queued.contains(&id) {
            return false;
        }

        self.seq += 1;
        self.queued.insert(id);
        self.heap.push(Entry {
            priority: provider.priority(),
            seq: self.seq,
            provider,
        });
        true
    }

    /// Take the provider that should build the next frame.
    pub fn pop(&mut self) -> Option<Arc<dyn FrameProvider>> {
        let entry = self.heap.pop()?;
        let id = identity(&entry.provider);
        if !self.heap.iter().any(|e| identity(&e.provider) == id) {
            self.queued.remove(&id);
        }
        Some(entry.provider)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drop every queued provider.
    pub fn clear(&mut self) {
        self.heap.clear();
        self.queued.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::reactor::Reactor;
    use crate::stream::FrameResult;

    struct Fixed(u8);

    impl FrameProvider for Fixed {
        fn build_frame(&self, _reactor: &Reactor) -> Result<FrameResult> {
            Ok(FrameResult::idle())
        }

        fn priority(&self) -> u8 {
            self.0
        }
    }

    fn provider(priority: u8) -> Arc<dyn FrameProvider> {
        Arc::new(Fixed(priority))
    }

    #[test]
    fn test_pops_lowest_priority_first() {
        let mut scheduler = Scheduler::new();
        for p in [3, 1, 2] {
            scheduler.push(provider(p), true);
        }

        let order: Vec<u8> = std::iter::from_fn(|| scheduler.pop())
            .map(|p| p.priority())
            .collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let mut scheduler = Scheduler::new();
        let first = provider(2);
        let second = provider(2);
        scheduler.push(first.clone(), true);
        scheduler.push(second.clone(), true);

        assert!(Arc::ptr_eq(&scheduler.pop().unwrap(), &first));
        assert!(Arc::ptr_eq(&scheduler.pop().unwrap(), &second));
    }

    #[test]
    fn test_single_registration_is_idempotent() {
        let mut scheduler = Scheduler::new();
        let p = provider(1);
        assert!(scheduler.push(p.clone(), true));
        assert!(!scheduler.push(p.clone(), true));
        assert_eq!(scheduler.len(), 1);

        scheduler.pop();
        assert!(scheduler.push(p, true));
    }

    #[test]
    fn test_non_single_allows_duplicates() {
        let mut scheduler = Scheduler::new();
        let p = provider(1);
        scheduler.push(p.clone(), false);
        scheduler.push(p.clone(), false);
        assert_eq!(scheduler.len(), 2);

        // Still queued once after the first pop
        scheduler.pop();
        assert!(!scheduler.push(p, true));
    }

    #[test]
    fn test_clear() {
        let mut scheduler = Scheduler::new();
        scheduler.push(provider(1), true);
        scheduler.clear();
        assert!(scheduler.is_empty());
        assert!(scheduler.pop().is_none());
    }
}
