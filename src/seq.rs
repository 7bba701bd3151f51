//! Growable sequences whose backing buffer can be frozen.
//!
//! The header (pointer, length, capacity) stays with the owner; only the
//! backing buffer moves into protected pages. The frozen buffer spans the full
//! capacity, so appending into spare capacity faults, while appending at full
//! capacity moves the contents to a new writable buffer.
//!
//! ```
//! use pagefreeze::Seq;
//!
//! let mut xs: Seq<u32> = vec![1, 2, 3].into();
//! xs.shrink_to_fit();
//! let mut xs = xs.freeze();
//! assert_eq!(&xs[..], &[1, 2, 3]);
//!
//! // Full capacity: this append reallocates instead of writing frozen pages.
//! xs.push(4);
//! assert!(!xs.is_frozen());
//! ```

use crate::engine::FreezeEngine;
use crate::region::{PageRegion, ReadOnly};
use crate::shape::{ElementsNode, Kind, Node, Reflect, SequenceNode};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::mem::{self, ManuallyDrop, MaybeUninit};
use std::ops::{Deref, DerefMut};
use std::ptr::{self, NonNull};

/// Nullable growable sequence
pub struct Seq<T> {
    /// `None` for the nil sequence.
    ptr: Option<NonNull<T>>,
    len: usize,
    cap: usize,
    frozen: Option<PageRegion<ReadOnly>>,
    _owns: PhantomData<T>,
}

// SAFETY: `Seq<T>` owns its elements exactly like `Vec<T>`.
unsafe impl<T: Send> Send for Seq<T> {}
unsafe impl<T: Sync> Sync for Seq<T> {}

impl<T> Seq<T> {
    /// The nil sequence: no buffer at all.
    pub fn nil() -> Self {
        Self {
            ptr: None,
            len: 0,
            cap: 0,
            frozen: None,
            _owns: PhantomData,
        }
    }

    /// An empty, non-nil sequence.
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::from_vec(Vec::with_capacity(capacity))
    }

    pub fn from_vec(vec: Vec<T>) -> Self {
        let mut vec = ManuallyDrop::new(vec);
        Self {
            ptr: NonNull::new(vec.as_mut_ptr()),
            len: vec.len(),
            cap: vec.capacity(),
            frozen: None,
            _owns: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn is_nil(&self) -> bool {
        self.ptr.is_none()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.is_some()
    }

    pub fn as_ptr(&self) -> *const T {
        self.ptr.map_or(ptr::null(), |p| p.as_ptr() as *const T)
    }

    /// Append `value`.
    ///
    /// With spare capacity the element is written in place, which faults when
    /// the buffer is frozen. At full capacity the contents move to a new
    /// writable buffer first.
    pub fn push(&mut self, value: T) {
        if let Some(base) = self.ptr.filter(|_| self.len < self.cap) {
            // SAFETY: `len < cap`, so the slot is inside the buffer.
            unsafe { base.as_ptr().add(self.len).write(value) };
            self.len += 1;
            return;
        }

        let mut grown = self.take_vec_reserving(1);
        grown.push(value);
        self.adopt(grown);
    }

    /// Shrink a heap buffer to its length. Frozen buffers are left alone.
    pub fn shrink_to_fit(&mut self) {
        if self.is_frozen() || self.is_nil() {
            return;
        }
        let mut vec = self.take_vec_reserving(0);
        vec.shrink_to_fit();
        self.adopt(vec);
    }

    /// Move the elements into a `Vec`, releasing any frozen buffer.
    pub fn into_vec(mut self) -> Vec<T> {
        self.take_vec_reserving(0)
    }

    /// Freeze through the process-wide engine.
    pub fn freeze(mut self) -> Self {
        self.freeze_with(FreezeEngine::global());
        self
    }

    /// Copy the backing buffer into frozen pages and repoint at the copy.
    ///
    /// Nil, empty and zero-sized-element sequences are left unchanged.
    pub fn freeze_with(&mut self, engine: &FreezeEngine) {
        let Some(base) = self.ptr else {
            return;
        };
        let size = mem::size_of::<T>();
        if size == 0 {
            return;
        }
        debug_assert!(mem::align_of::<T>() <= engine.page_size());

        // SAFETY: the buffer holds `len` initialized elements.
        let region = unsafe {
            engine.copy_and_freeze_reserved(base.as_ptr().cast(), self.len * size, self.cap * size)
        };
        let Some(region) = region else {
            return;
        };

        let copy = region.base().cast::<T>();
        let previous = self.frozen.replace(region);
        self.ptr = Some(copy);

        match previous {
            Some(old_region) => drop(old_region),
            // SAFETY: the heap buffer came from a `Vec` with this capacity;
            // length zero releases it without dropping the moved elements.
            None => drop(unsafe { Vec::from_raw_parts(base.as_ptr(), 0, self.cap) }),
        }
    }

    /// Move the elements into a `Vec` with room for `additional` more and
    /// leave `self` nil.
    fn take_vec_reserving(&mut self, additional: usize) -> Vec<T> {
        let Some(base) = self.ptr.take() else {
            return Vec::with_capacity(additional);
        };
        let len = mem::replace(&mut self.len, 0);
        let cap = mem::replace(&mut self.cap, 0);

        match self.frozen.take() {
            Some(region) => {
                let mut vec = Vec::with_capacity(len + additional);
                // SAFETY: the region holds `len` initialized elements and the
                // new buffer has room for them; the region is released
                // without dropping them.
                unsafe {
                    ptr::copy_nonoverlapping(base.as_ptr(), vec.as_mut_ptr(), len);
                    vec.set_len(len);
                }
                drop(region);
                vec
            }
            None => {
                // SAFETY: the parts came from a `Vec` adopted by `from_vec`.
                let mut vec = unsafe { Vec::from_raw_parts(base.as_ptr(), len, cap) };
                vec.reserve(additional);
                vec
            }
        }
    }

    fn adopt(&mut self, vec: Vec<T>) {
        let mut vec = ManuallyDrop::new(vec);
        self.ptr = NonNull::new(vec.as_mut_ptr());
        self.len = vec.len();
        self.cap = vec.capacity();
    }
}

impl<T> Drop for Seq<T> {
    fn drop(&mut self) {
        let Some(base) = self.ptr else {
            return;
        };
        if self.frozen.is_some() {
            // Drop copies so destructors never write the protected pages.
            for i in 0..self.len {
                // SAFETY: each of the `len` slots is initialized and read once.
                drop(unsafe { ptr::read(base.as_ptr().add(i)) });
            }
        } else {
            // SAFETY: the parts came from a `Vec` adopted by `from_vec`.
            drop(unsafe { Vec::from_raw_parts(base.as_ptr(), self.len, self.cap) });
        }
    }
}

impl<T> Default for Seq<T> {
    fn default() -> Self {
        Self::nil()
    }
}

impl<T> Deref for Seq<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        match self.ptr {
            // SAFETY: `len` initialized elements start at `base`.
            Some(base) => unsafe { std::slice::from_raw_parts(base.as_ptr(), self.len) },
            None => &[],
        }
    }
}

impl<T> DerefMut for Seq<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        match self.ptr {
            // SAFETY: as in `deref`, with exclusivity from `&mut self`.
            Some(base) => unsafe { std::slice::from_raw_parts_mut(base.as_ptr(), self.len) },
            None => &mut [],
        }
    }
}

impl<T> From<Vec<T>> for Seq<T> {
    fn from(vec: Vec<T>) -> Self {
        Self::from_vec(vec)
    }
}

impl<T> FromIterator<T> for Seq<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}

impl<T> Extend<T> for Seq<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for value in iter {
            self.push(value);
        }
    }
}

/// Clones into a fresh, unfrozen buffer. Nil stays nil.
impl<T: Clone> Clone for Seq<T> {
    fn clone(&self) -> Self {
        if self.is_nil() {
            return Self::nil();
        }
        Self::from_vec(self.to_vec())
    }
}

impl<T: PartialEq> PartialEq for Seq<T> {
    fn eq(&self, other: &Self) -> bool {
        self[..] == other[..]
    }
}

impl<T: Eq> Eq for Seq<T> {}

impl<T: Hash> Hash for Seq<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self[..].hash(state);
    }
}

impl<T: fmt::Debug> fmt::Debug for Seq<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T: Reflect> Reflect for Seq<T> {
    const KIND: Kind = Kind::Sequence;

    fn node(&mut self) -> Node<'_> {
        Node::Sequence(self)
    }
}

impl<T: Reflect> ElementsNode for Seq<T> {
    fn element_kind(&self) -> Kind {
        T::KIND
    }

    fn len(&self) -> usize {
        self.len
    }

    fn element(&mut self, index: usize) -> Node<'_> {
        self[index].node()
    }
}

impl<T: Reflect> SequenceNode for Seq<T> {
    fn is_nil(&self) -> bool {
        self.ptr.is_none()
    }

    fn store_in_place(&mut self) {
        if self.cap == 0 || mem::size_of::<T>() == 0 {
            return;
        }
        if let Some(base) = self.ptr {
            let byte = base.as_ptr().cast::<MaybeUninit<u8>>();
            // SAFETY: a non-empty allocation of `cap` elements starts here.
            unsafe { byte.write_volatile(byte.read_volatile()) };
        }
    }

    fn freeze_backing(&mut self, engine: &FreezeEngine) -> bool {
        self.freeze_with(engine);
        self.is_frozen()
    }
}
