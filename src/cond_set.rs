//! Hashed, insertion-ordered set of chunk conditions.
//!
//! Conditions live in an arena of slots. Every live slot is threaded on two
//! doubly-linked lists: the global list (insertion order) and the chain of its
//! hash bucket. Both unlinks are O(1), so removal never scans.

use crate::condition::ChunkCondition;
use crate::identity::IdentityRegistry;

const INITIAL_BUCKETS: usize = 16;

/// Stable handle to a condition in a [`ChunkConditionSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CondHandle(u32);

/// What happened to a condition offered to the set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insert {
    Added(CondHandle),
    /// Folded into an existing positive condition.
    Merged(CondHandle),
    /// An equivalent condition was already present.
    Duplicate(CondHandle),
}

impl Insert {
    pub fn handle(self) -> CondHandle {
        match self {
            Insert::Added(h) | Insert::Merged(h) | Insert::Duplicate(h) => h,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Links {
    prev: Option<u32>,
    next: Option<u32>,
}

#[derive(Debug)]
struct Slot {
    cond: Option<ChunkCondition>,
    hash: u64,
    all: Links,
    bucket: Links,
}

#[derive(Debug)]
pub struct ChunkConditionSet {
    slots: Vec<Slot>,
    free: Vec<u32>,
    head: Option<u32>,
    tail: Option<u32>,
    buckets: Vec<Option<u32>>,
    len: usize,
    merged: u64,
}

impl ChunkConditionSet {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            buckets: vec![None; INITIAL_BUCKETS],
            len: 0,
            merged: 0,
        }
    }

    fn bucket_of(&self, hash: u64) -> usize {
        (hash as usize) & (self.buckets.len() - 1)
    }

    fn bucket_chain(&self, hash: u64) -> impl Iterator<Item = u32> + '_ {
        let mut cursor = self.buckets[self.bucket_of(hash)];
        std::iter::from_fn(move || {
            let idx = cursor?;
            cursor = self.slots[idx as usize].bucket.next;
            Some(idx)
        })
    }

    /// Find a condition with the same structure as `cond`.
    pub fn find(&self, cond: &ChunkCondition) -> Option<CondHandle> {
        let hash = cond.instantiated.structural_hash();
        self.bucket_chain(hash)
            .find(|&idx| {
                let slot = &self.slots[idx as usize];
                slot.hash == hash
                    && slot
                        .cond
                        .as_ref()
                        .is_some_and(|c| c.instantiated.same_structure(&cond.instantiated))
            })
            .map(CondHandle)
    }

    pub fn contains(&self, cond: &ChunkCondition) -> bool {
        self.find(cond).is_some()
    }

    /// Insert a condition.
    ///
    /// With a registry, a positive condition whose structure is already present
    /// is merged into the existing entry. Without one, it counts as a duplicate
    /// only when fully equivalent; otherwise it is added alongside.
    pub fn insert(
        &mut self,
        cond: ChunkCondition,
        identities: Option<&mut IdentityRegistry>,
    ) -> Insert {
        if let Some(existing) = self.find(&cond) {
            let slot = &mut self.slots[existing.0 as usize];
            if let Some(present) = slot.cond.as_mut() {
                if !cond.instantiated.is_positive() {
                    return Insert::Duplicate(existing);
                }
                match identities {
                    Some(registry) => {
                        present.instantiated.merge_from(&cond.instantiated, registry);
                        present.variablized.merge_from(&cond.variablized, registry);
                        self.merged += 1;
                        return Insert::Merged(existing);
                    }
                    None if present.instantiated.equivalent(&cond.instantiated) => {
                        return Insert::Duplicate(existing);
                    }
                    None => {}
                }
            }
        }
        Insert::Added(self.push(cond))
    }

    fn push(&mut self, cond: ChunkCondition) -> CondHandle {
        if self.len + 1 > self.buckets.len() * 2 {
            self.grow();
        }
        let hash = cond.instantiated.structural_hash();
        let slot = Slot {
            cond: Some(cond),
            hash,
            all: Links {
                prev: self.tail,
                next: None,
            },
            bucket: Links::default(),
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx as usize] = slot;
                idx
            }
            None => {
                self.slots.push(slot);
                (self.slots.len() - 1) as u32
            }
        };
        match self.tail {
            Some(tail) => self.slots[tail as usize].all.next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
        self.link_bucket(idx);
        self.len += 1;
        CondHandle(idx)
    }

    fn link_bucket(&mut self, idx: u32) {
        let b = self.bucket_of(self.slots[idx as usize].hash);
        let old = self.buckets[b];
        self.slots[idx as usize].bucket = Links {
            prev: None,
            next: old,
        };
        if let Some(old) = old {
            self.slots[old as usize].bucket.prev = Some(idx);
        }
        self.buckets[b] = Some(idx);
    }

    fn grow(&mut self) {
        let order: Vec<u32> = self.iter_indices().collect();
        self.buckets = vec![None; self.buckets.len() * 2];
        for idx in order {
            self.link_bucket(idx);
        }
    }

    /// Remove a condition, unlinking it from both lists.
    pub fn remove(&mut self, handle: CondHandle) -> Option<ChunkCondition> {
        let idx = handle.0;
        let slot = self.slots.get_mut(idx as usize)?;
        let cond = slot.cond.take()?;
        let (all, bucket, hash) = (slot.all, slot.bucket, slot.hash);

        match all.prev {
            Some(p) => self.slots[p as usize].all.next = all.next,
            None => self.head = all.next,
        }
        match all.next {
            Some(n) => self.slots[n as usize].all.prev = all.prev,
            None => self.tail = all.prev,
        }
        match bucket.prev {
            Some(p) => self.slots[p as usize].bucket.next = bucket.next,
            None => {
                let b = self.bucket_of(hash);
                self.buckets[b] = bucket.next;
            }
        }
        if let Some(n) = bucket.next {
            self.slots[n as usize].bucket.prev = bucket.prev;
        }
        self.free.push(idx);
        self.len -= 1;
        Some(cond)
    }

    pub fn get(&self, handle: CondHandle) -> Option<&ChunkCondition> {
        self.slots.get(handle.0 as usize)?.cond.as_ref()
    }

    fn iter_indices(&self) -> impl Iterator<Item = u32> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let idx = cursor?;
            cursor = self.slots[idx as usize].all.next;
            Some(idx)
        })
    }

    /// Conditions in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &ChunkCondition> + '_ {
        self.iter_indices()
            .filter_map(|idx| self.slots[idx as usize].cond.as_ref())
    }

    pub fn handles(&self) -> impl Iterator<Item = CondHandle> + '_ {
        self.iter_indices().map(CondHandle)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Positive conditions folded into an existing entry since creation.
    pub fn merged_count(&self) -> u64 {
        self.merged
    }

    /// Remove every condition, returning them in insertion order.
    pub fn drain(&mut self) -> Vec<ChunkCondition> {
        let order: Vec<u32> = self.iter_indices().collect();
        let out = order
            .into_iter()
            .filter_map(|idx| self.slots[idx as usize].cond.take())
            .collect();
        self.clear();
        out
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
        self.buckets = vec![None; INITIAL_BUCKETS];
        self.len = 0;
        self.merged = 0;
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

impl Default for ChunkConditionSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "tests/cond_set.rs"]
mod tests;
