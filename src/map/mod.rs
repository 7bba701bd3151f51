//! Hash maps that can be frozen.
//!
//! A frozen map keeps its entry count and iterator bookkeeping writable (the
//! mutable prefix of the control record sits at the end of a writable page)
//! while the bucket array and the rest of the control record are read-only.
//! Lookups and iteration keep working; inserting, overwriting or removing
//! faults.
//!
//! ```
//! use pagefreeze::Map;
//!
//! let mut ages = Map::new();
//! ages.insert("ada", 36);
//! ages.insert("alan", 41);
//! let ages = ages.freeze();
//!
//! assert!(ages.is_frozen());
//! assert_eq!(ages.get("ada"), Some(&36));
//! assert_eq!(ages.iter().count(), 2);
//! ```

mod control;

pub use control::MUTABLE_PREFIX_LEN;

use crate::engine::FreezeEngine;
use crate::region::split::SplitLayout;
use crate::region::{PageRegion, ReadOnly};
use crate::shape::{Kind, MapNode, Node, Reflect};
use crate::walker::GraphWalker;
use control::{alloc_buckets, free_buckets, MapControl, Slot};
use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::mem;
use std::ptr::{self, NonNull};

/// Nullable hash map with freezable storage
pub struct Map<K, V> {
    /// `None` for the nil map.
    control: Option<NonNull<MapControl<K, V>>>,
    /// Set once the control record lives in a split layout.
    split: Option<SplitLayout>,
    /// Set once the bucket array lives in read-only pages.
    buckets_frozen: Option<PageRegion<ReadOnly>>,
    _owns: PhantomData<(K, V)>,
}

// SAFETY: the map owns its entries exclusively. It is not `Sync`: iteration
// updates the iterator count through a `Cell`.
unsafe impl<K: Send, V: Send> Send for Map<K, V> {}

impl<K, V> Map<K, V> {
    /// The nil map: no control record at all.
    pub fn nil() -> Self {
        Self {
            control: None,
            split: None,
            buckets_frozen: None,
            _owns: PhantomData,
        }
    }

    /// An empty, non-nil map.
    pub fn new() -> Self {
        Self {
            control: Some(NonNull::from(Box::leak(Box::new(MapControl::empty())))),
            split: None,
            buckets_frozen: None,
            _owns: PhantomData,
        }
    }

    fn control(&self) -> Option<&MapControl<K, V>> {
        // SAFETY: a non-nil control pointer always refers to a live record.
        self.control.map(|c| unsafe { &*c.as_ptr() })
    }

    fn control_mut(&mut self) -> Option<&mut MapControl<K, V>> {
        // SAFETY: as in `control`, with exclusivity from `&mut self`.
        self.control.map(|c| unsafe { &mut *c.as_ptr() })
    }

    pub fn len(&self) -> usize {
        self.control().map_or(0, |c| c.count)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_nil(&self) -> bool {
        self.control.is_none()
    }

    pub fn is_frozen(&self) -> bool {
        self.split.is_some()
    }

    /// Iterators currently borrowing the map.
    pub fn active_iterators(&self) -> usize {
        self.control().map_or(0, |c| c.iterators.get())
    }

    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter::new(self.control())
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> + '_ {
        self.iter().map(|(_, v)| v)
    }

    /// Move every entry out, releasing all storage. Nil maps yield nothing.
    pub fn into_entries(mut self) -> Vec<(K, V)> {
        let mut entries = Vec::with_capacity(self.len());
        if let Some(control) = self.control() {
            for i in 0..control.bucket_count {
                // SAFETY: each slot is read exactly once; storage is released
                // below without dropping the slots again.
                if let Some(entry) = unsafe { ptr::read(control.buckets.as_ptr().add(i)) } {
                    entries.push(entry);
                }
            }
        }
        self.release_storage();
        entries
    }

    /// Free buckets and control record without dropping entries, leaving `self` nil.
    fn release_storage(&mut self) {
        let Some(control) = self.control.take() else {
            return;
        };
        // SAFETY: the control record is live until released below.
        let (buckets, bucket_count) = unsafe {
            let c = control.as_ref();
            (c.buckets, c.bucket_count)
        };

        match self.buckets_frozen.take() {
            Some(region) => drop(region),
            // SAFETY: heap buckets come from `alloc_buckets`; entries are gone.
            None => unsafe { free_buckets(buckets, bucket_count) },
        }
        match self.split.take() {
            Some(layout) => drop(layout),
            // SAFETY: a heap control record comes from `Box::leak` in `new`.
            None => drop(unsafe { Box::from_raw(control.as_ptr()) }),
        }
    }

    /// Freeze through the process-wide engine.
    pub fn freeze(mut self) -> Self {
        self.freeze_with(FreezeEngine::global());
        self
    }

    /// Freeze the bucket array, then split-freeze the control record.
    ///
    /// Nil and empty maps are left unchanged. Freezing an already frozen map
    /// moves it to new frozen storage.
    pub fn freeze_with(&mut self, engine: &FreezeEngine) {
        let Some(current) = self.control else {
            return;
        };
        if self.is_empty() {
            return;
        }

        // SAFETY: the control record is live.
        let source = unsafe { current.as_ref() };
        let bucket_bytes = source.bucket_count * mem::size_of::<Slot<K, V>>();
        // SAFETY: the bucket array spans `bucket_bytes` initialized bytes.
        let buckets = unsafe { engine.copy_and_freeze(source.buckets.as_ptr().cast(), bucket_bytes) };

        // Build the image off to the side so nothing already frozen is written.
        // SAFETY: bitwise copy of a live record; the original is released
        // below without being dropped.
        let mut image = unsafe { ptr::read(current.as_ptr()) };
        if let Some(region) = &buckets {
            image.buckets = region.base().cast();
        }
        image.iterators.set(0);

        // SAFETY: `image` is a valid, readable record of the given size.
        let layout = unsafe {
            engine.freeze_split(
                (&image as *const MapControl<K, V>).cast(),
                mem::size_of::<MapControl<K, V>>(),
                MUTABLE_PREFIX_LEN,
            )
        };
        mem::forget(image);

        let placed = layout.image_ptr().cast::<MapControl<K, V>>();
        debug_assert_eq!(placed.as_ptr() as usize % mem::align_of::<MapControl<K, V>>(), 0);

        let old_split = self.split.replace(layout);
        let old_buckets = match buckets {
            Some(region) => self.buckets_frozen.replace(region),
            None => self.buckets_frozen.take(),
        };
        self.control = Some(placed);

        match old_buckets {
            Some(region) => drop(region),
            // SAFETY: heap buckets from `alloc_buckets`; entries now live in the copy.
            None => unsafe { free_buckets(source.buckets, source.bucket_count) },
        }
        match old_split {
            Some(layout) => drop(layout),
            // SAFETY: heap control record from `Box::leak`; contents were copied.
            None => drop(unsafe { Box::from_raw(current.as_ptr().cast::<mem::MaybeUninit<MapControl<K, V>>>()) }),
        }
    }
}

impl<K: Hash + Eq, V> Map<K, V> {
    pub fn with_capacity(capacity: usize) -> Self {
        let mut map = Self::new();
        if capacity > 0 {
            let buckets = (capacity * 4 / 3 + 1).next_power_of_two().max(8);
            map.grow_to(buckets);
        }
        map
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let control = self.control()?;
        let index = control.find(key)?;
        control.slots()[index].as_ref().map(|(_, v)| v)
    }

    pub fn get_key_value<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let control = self.control()?;
        let index = control.find(key)?;
        control.slots()[index].as_ref().map(|(k, v)| (k, v))
    }

    /// Mutable access to a value. Writing through it faults once frozen.
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let control = self.control_mut()?;
        let index = control.find(key)?;
        // SAFETY: `index < bucket_count`; exclusivity from `&mut self`.
        let slot = unsafe { &mut *control.buckets.as_ptr().add(index) };
        slot.as_mut().map(|(_, v)| v)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key).is_some()
    }

    /// Insert or overwrite. A nil map is given storage first.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        if self.is_nil() {
            *self = Self::new();
        }
        if let Some(control) = self.control_mut() {
            if let Some(index) = control.find(&key) {
                return control.replace_value(index, value);
            }
            if control.needs_grow() {
                let next = control.next_bucket_count();
                self.grow_to(next);
            }
        }
        if let Some(control) = self.control_mut() {
            control.insert_new(key, value);
        }
        None
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.remove_entry(key).map(|(_, v)| v)
    }

    pub fn remove_entry<Q>(&mut self, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let control = self.control_mut()?;
        let index = control.find(key)?;
        control.take(index)
    }

    fn grow_to(&mut self, bucket_count: usize) {
        let fresh = alloc_buckets(bucket_count);
        let Some(control) = self.control_mut() else {
            return;
        };
        // SAFETY: `fresh` is a new empty array of a power-of-two size larger
        // than the entry count. Rehashing writes the protected fields of a
        // frozen control record, which faults before anything is released.
        let (old, old_count) = unsafe { control.rehash(fresh, bucket_count) };
        match self.buckets_frozen.take() {
            Some(region) => drop(region),
            // SAFETY: heap buckets from `alloc_buckets`; entries were moved.
            None => unsafe { free_buckets(old, old_count) },
        }
    }
}

impl<K, V> Drop for Map<K, V> {
    fn drop(&mut self) {
        if let Some(control) = self.control() {
            for i in 0..control.bucket_count {
                // Drop copies so destructors never write the protected pages.
                // SAFETY: each slot is read exactly once before release.
                drop(unsafe { ptr::read(control.buckets.as_ptr().add(i)) });
            }
        }
        self.release_storage();
    }
}

impl<K, V> Default for Map<K, V> {
    fn default() -> Self {
        Self::nil()
    }
}

/// Borrowing iterator over a map's entries
pub struct Iter<'a, K, V> {
    control: Option<&'a MapControl<K, V>>,
    index: usize,
}

impl<'a, K, V> Iter<'a, K, V> {
    fn new(control: Option<&'a MapControl<K, V>>) -> Self {
        if let Some(c) = control {
            c.iterators.set(c.iterators.get() + 1);
        }
        Self { control, index: 0 }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let control = self.control?;
        let slots = control.slots();
        while self.index < slots.len() {
            let slot = &slots[self.index];
            self.index += 1;
            if let Some((k, v)) = slot {
                return Some((k, v));
            }
        }
        None
    }
}

impl<K, V> Drop for Iter<'_, K, V> {
    fn drop(&mut self) {
        if let Some(c) = self.control {
            c.iterators.set(c.iterators.get() - 1);
        }
    }
}

impl<'a, K, V> IntoIterator for &'a Map<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Iter<'a, K, V> {
        self.iter()
    }
}

impl<K: Hash + Eq, V> FromIterator<(K, V)> for Map<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Map::new();
        map.extend(iter);
        map
    }
}

impl<K: Hash + Eq, V> Extend<(K, V)> for Map<K, V> {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

/// Clones into fresh, unfrozen storage. Nil stays nil.
impl<K: Hash + Eq + Clone, V: Clone> Clone for Map<K, V> {
    fn clone(&self) -> Self {
        if self.is_nil() {
            return Self::nil();
        }
        let mut map = Self::with_capacity(self.len());
        for (k, v) in self.iter() {
            map.insert(k.clone(), v.clone());
        }
        map
    }
}

impl<K: Hash + Eq, V: PartialEq> PartialEq for Map<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl<K: Hash + Eq, V: Eq> Eq for Map<K, V> {}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for Map<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K: Reflect + Hash + Eq, V: Reflect> Reflect for Map<K, V> {
    const KIND: Kind = Kind::Map;

    fn node(&mut self) -> Node<'_> {
        Node::Map(self)
    }
}

impl<K: Reflect + Hash + Eq, V: Reflect> MapNode for Map<K, V> {
    fn key_kind(&self) -> Kind {
        K::KIND
    }

    fn value_kind(&self) -> Kind {
        V::KIND
    }

    fn is_nil(&self) -> bool {
        self.control.is_none()
    }

    fn len(&self) -> usize {
        Map::len(self)
    }

    fn store_in_place(&mut self) {
        if let Some(control) = self.control {
            // SAFETY: a non-nil control pointer refers to a live record, and
            // `bucket_count` lies past the writable prefix.
            unsafe {
                let field = ptr::addr_of_mut!((*control.as_ptr()).bucket_count);
                field.write_volatile(field.read_volatile());
            }
        }
    }

    fn rebuild_frozen(&mut self, walker: &mut GraphWalker<'_>) {
        if self.control.is_none() {
            return;
        }
        let original = mem::replace(self, Map::nil());
        let mut rebuilt = Map::with_capacity(original.len());
        for (mut key, mut value) in original.into_entries() {
            if K::KIND.can_hold_pointers() {
                walker.walk(key.node());
            }
            if V::KIND.can_hold_pointers() {
                walker.walk(value.node());
            }
            rebuilt.insert(key, value);
        }
        *self = rebuilt;
    }

    fn freeze_control(&mut self, engine: &FreezeEngine) -> bool {
        self.freeze_with(engine);
        self.is_frozen()
    }
}
