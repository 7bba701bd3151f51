// Map control record
//
// Purpose: the open-addressing table behind `Map`, laid out so that a frozen
// map can keep its bookkeeping writable while everything else is protected.
// Invariant: `count` and `iterators` form the mutable prefix and come first.
// Every field after them (hasher keys, bucket pointer, bucket count) is
// placed in read-only pages when the map is frozen. Reordering the fields
// changes MUTABLE_PREFIX_LEN and the assertions below fail to compile.

use std::borrow::Borrow;
use std::cell::Cell;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};
use std::mem::{self, MaybeUninit};
use std::ptr::{self, NonNull};

pub(crate) type Slot<K, V> = Option<(K, V)>;

/// Smallest non-empty table
const MIN_BUCKETS: usize = 8;

#[repr(C)]
pub(crate) struct MapControl<K, V> {
    // Mutable prefix
    pub(crate) count: usize,
    pub(crate) iterators: Cell<usize>,
    // Protected once frozen
    pub(crate) hasher: RandomState,
    pub(crate) buckets: NonNull<Slot<K, V>>,
    pub(crate) bucket_count: usize,
}

/// Bytes at the start of the record that stay writable after a freeze
pub const MUTABLE_PREFIX_LEN: usize = mem::offset_of!(MapControl<u8, u8>, hasher);

const _: () = assert!(mem::offset_of!(MapControl<u8, u8>, count) == 0);
const _: () = assert!(mem::offset_of!(MapControl<u8, u8>, iterators) == mem::size_of::<usize>());
const _: () = assert!(MUTABLE_PREFIX_LEN == 2 * mem::size_of::<usize>());

impl<K, V> MapControl<K, V> {
    pub(crate) fn empty() -> Self {
        Self {
            count: 0,
            iterators: Cell::new(0),
            hasher: RandomState::new(),
            buckets: NonNull::dangling(),
            bucket_count: 0,
        }
    }

    pub(crate) fn slots(&self) -> &[Slot<K, V>] {
        // SAFETY: `buckets` holds `bucket_count` initialized slots (or is
        // dangling with a count of zero).
        unsafe { std::slice::from_raw_parts(self.buckets.as_ptr(), self.bucket_count) }
    }

    fn slots_mut(&mut self) -> &mut [Slot<K, V>] {
        // SAFETY: as in `slots`, with exclusivity from `&mut self`.
        unsafe { std::slice::from_raw_parts_mut(self.buckets.as_ptr(), self.bucket_count) }
    }

    fn mask(&self) -> usize {
        self.bucket_count.wrapping_sub(1)
    }

    /// True when one more entry would exceed a 3/4 load factor.
    pub(crate) fn needs_grow(&self) -> bool {
        (self.count + 1) * 4 > self.bucket_count * 3
    }

    /// Bucket count the table grows to next.
    pub(crate) fn next_bucket_count(&self) -> usize {
        (self.bucket_count * 2).max(MIN_BUCKETS)
    }
}

impl<K: Hash + Eq, V> MapControl<K, V> {
    fn ideal<Q: Hash + ?Sized>(&self, key: &Q) -> usize {
        (self.hasher.hash_one(key) as usize) & self.mask()
    }

    pub(crate) fn find<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if self.bucket_count == 0 {
            return None;
        }
        let slots = self.slots();
        let mut i = self.ideal(key);
        loop {
            match &slots[i] {
                None => return None,
                Some((k, _)) if k.borrow() == key => return Some(i),
                Some(_) => i = (i + 1) & self.mask(),
            }
        }
    }

    /// Insert a key known to be absent. The slot is written before the count.
    pub(crate) fn insert_new(&mut self, key: K, value: V) {
        debug_assert!(!self.needs_grow());
        let mask = self.mask();
        let mut i = self.ideal(&key);
        let slots = self.slots_mut();
        while slots[i].is_some() {
            i = (i + 1) & mask;
        }
        slots[i] = Some((key, value));
        self.count += 1;
    }

    /// Replace the value at `index`, returning the previous one.
    pub(crate) fn replace_value(&mut self, index: usize, value: V) -> Option<V> {
        match &mut self.slots_mut()[index] {
            Some((_, slot)) => Some(mem::replace(slot, value)),
            None => None,
        }
    }

    /// Remove the entry at `index` with backward-shift deletion.
    pub(crate) fn take(&mut self, index: usize) -> Option<(K, V)> {
        let mask = self.mask();
        let entry = self.slots_mut()[index].take()?;

        let mut hole = index;
        let mut j = (index + 1) & mask;
        loop {
            let ideal = match &self.slots()[j] {
                None => break,
                Some((k, _)) => self.ideal(k),
            };
            // The entry may move into the hole when the hole lies on its probe path.
            if (j.wrapping_sub(ideal) & mask) >= (j.wrapping_sub(hole) & mask) {
                let slots = self.slots_mut();
                slots[hole] = slots[j].take();
                hole = j;
            }
            j = (j + 1) & mask;
        }

        self.count -= 1;
        Some(entry)
    }

    /// Move every entry into `fresh` and return the previous bucket array for
    /// release. Entries are moved bitwise; the old slots must not be dropped.
    ///
    /// # Safety
    ///
    /// `fresh` must hold `fresh_count` empty slots, with `fresh_count` a power
    /// of two larger than `count`.
    pub(crate) unsafe fn rehash(
        &mut self,
        fresh: NonNull<Slot<K, V>>,
        fresh_count: usize,
    ) -> (NonNull<Slot<K, V>>, usize) {
        let mask = fresh_count - 1;
        for i in 0..self.bucket_count {
            // SAFETY: `i < bucket_count`; each slot is read exactly once.
            let slot = unsafe { ptr::read(self.buckets.as_ptr().add(i)) };
            if let Some((key, value)) = slot {
                let mut j = (self.hasher.hash_one(&key) as usize) & mask;
                // SAFETY: `fresh` holds `fresh_count` slots and has room.
                unsafe {
                    while (*fresh.as_ptr().add(j)).is_some() {
                        j = (j + 1) & mask;
                    }
                    fresh.as_ptr().add(j).write(Some((key, value)));
                }
            }
        }

        let previous = (self.buckets, self.bucket_count);
        self.buckets = fresh;
        self.bucket_count = fresh_count;
        previous
    }
}

/// Allocate `count` empty slots on the heap.
pub(crate) fn alloc_buckets<K, V>(count: usize) -> NonNull<Slot<K, V>> {
    if count == 0 {
        return NonNull::dangling();
    }
    let slots: Box<[Slot<K, V>]> = (0..count).map(|_| None).collect();
    NonNull::from(Box::leak(slots)).cast()
}

/// Release a heap bucket array without dropping its contents.
///
/// # Safety
///
/// `buckets` must come from [`alloc_buckets`] with the same `count`, and its
/// entries must already have been moved out or dropped.
pub(crate) unsafe fn free_buckets<K, V>(buckets: NonNull<Slot<K, V>>, count: usize) {
    if count == 0 {
        return;
    }
    let raw = ptr::slice_from_raw_parts_mut(buckets.as_ptr().cast::<MaybeUninit<Slot<K, V>>>(), count);
    // SAFETY: same allocation, viewed as uninitialized so nothing is dropped.
    drop(unsafe { Box::from_raw(raw) });
}
