//! Exclusively owned pointers that can be frozen in place.
//!
//! A [`Ptr`] starts out like a `Box`. Freezing copies the pointee into fresh
//! pages, protects them, and repoints the handle at the copy; any later write
//! through the handle faults.
//!
//! ```
//! use pagefreeze::Ptr;
//!
//! let counter = Ptr::new(41u64).freeze();
//! assert!(counter.is_frozen());
//! assert_eq!(*counter, 41);
//! ```

use crate::engine::FreezeEngine;
use crate::region::{PageRegion, ReadOnly};
use crate::shape::{Kind, Node, PointerNode, Reflect};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::mem::{self, ManuallyDrop, MaybeUninit};
use std::ops::{Deref, DerefMut};
use std::ptr::{self, NonNull};

/// Nullable, exclusively owned pointer
pub struct Ptr<T> {
    raw: Option<NonNull<T>>,
    /// Backing pages once frozen; `None` while the pointee lives on the heap.
    frozen: Option<PageRegion<ReadOnly>>,
    _owns: PhantomData<T>,
}

// SAFETY: `Ptr<T>` owns its pointee exactly like `Box<T>`.
unsafe impl<T: Send> Send for Ptr<T> {}
unsafe impl<T: Sync> Sync for Ptr<T> {}

impl<T> Ptr<T> {
    pub fn new(value: T) -> Self {
        let raw = NonNull::from(Box::leak(Box::new(value)));
        Self {
            raw: Some(raw),
            frozen: None,
            _owns: PhantomData,
        }
    }

    pub fn null() -> Self {
        Self {
            raw: None,
            frozen: None,
            _owns: PhantomData,
        }
    }

    pub fn is_null(&self) -> bool {
        self.raw.is_none()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.is_some()
    }

    pub fn get(&self) -> Option<&T> {
        // SAFETY: a non-null `raw` always points to a live, initialized `T`.
        self.raw.map(|raw| unsafe { &*raw.as_ptr() })
    }

    /// Mutable access to the pointee. Writing through it faults once frozen.
    pub fn get_mut(&mut self) -> Option<&mut T> {
        // SAFETY: as in `get`, and `&mut self` guarantees exclusivity.
        self.raw.map(|raw| unsafe { &mut *raw.as_ptr() })
    }

    /// Address of the pointee, or null.
    pub fn as_ptr(&self) -> *const T {
        self.raw.map_or(ptr::null(), |raw| raw.as_ptr() as *const T)
    }

    /// Freeze through the process-wide engine.
    pub fn freeze(mut self) -> Self {
        self.freeze_with(FreezeEngine::global());
        self
    }

    /// Copy the pointee into frozen pages and repoint at the copy.
    ///
    /// Null pointers and zero-sized pointees are left unchanged. Freezing an
    /// already frozen pointer moves it to a new frozen copy.
    pub fn freeze_with(&mut self, engine: &FreezeEngine) {
        let Some(raw) = self.raw else {
            return;
        };
        debug_assert!(mem::align_of::<T>() <= engine.page_size());

        // SAFETY: `raw` points to a live `T` of `size_of::<T>()` bytes.
        let region = unsafe { engine.copy_and_freeze(raw.as_ptr().cast(), mem::size_of::<T>()) };
        let Some(region) = region else {
            return;
        };

        let copy = region.base().cast::<T>();
        let previous = self.frozen.replace(region);
        self.raw = Some(copy);

        // The bits now live in the frozen copy: release the old storage
        // without running `T`'s destructor.
        match previous {
            Some(old_region) => drop(old_region),
            // SAFETY: `raw` came from `Box::leak` and is not used again.
            None => drop(unsafe { Box::from_raw(raw.as_ptr().cast::<MaybeUninit<T>>()) }),
        }
    }

    /// Move the pointee out, releasing its storage.
    pub fn into_inner(self) -> Option<T> {
        let mut this = ManuallyDrop::new(self);
        let raw = this.raw?;
        match this.frozen.take() {
            Some(region) => {
                // SAFETY: the region holds an initialized `T`; reading never
                // writes the protected pages. The region is released after.
                let value = unsafe { ptr::read(raw.as_ptr()) };
                drop(region);
                Some(value)
            }
            // SAFETY: `raw` came from `Box::leak`.
            None => Some(*unsafe { Box::from_raw(raw.as_ptr()) }),
        }
    }
}

impl<T> Drop for Ptr<T> {
    fn drop(&mut self) {
        let Some(raw) = self.raw else {
            return;
        };
        if self.frozen.is_some() {
            // Drop a copy so destructors never write the protected pages; the
            // region itself is released by the field drop that follows.
            // SAFETY: the region holds an initialized `T` not used again.
            drop(unsafe { ptr::read(raw.as_ptr()) });
        } else {
            // SAFETY: `raw` came from `Box::leak`.
            drop(unsafe { Box::from_raw(raw.as_ptr()) });
        }
    }
}

impl<T> Default for Ptr<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> From<T> for Ptr<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T> Deref for Ptr<T> {
    type Target = T;

    /// # Panics
    ///
    /// Panics when the pointer is null.
    fn deref(&self) -> &T {
        match self.get() {
            Some(value) => value,
            None => panic!("dereferenced a null Ptr"),
        }
    }
}

impl<T> DerefMut for Ptr<T> {
    /// # Panics
    ///
    /// Panics when the pointer is null.
    fn deref_mut(&mut self) -> &mut T {
        match self.get_mut() {
            Some(value) => value,
            None => panic!("dereferenced a null Ptr"),
        }
    }
}

/// Clones into fresh, unfrozen heap storage.
impl<T: Clone> Clone for Ptr<T> {
    fn clone(&self) -> Self {
        match self.get() {
            Some(value) => Ptr::new(value.clone()),
            None => Ptr::null(),
        }
    }
}

impl<T: PartialEq> PartialEq for Ptr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.get() == other.get()
    }
}

impl<T: Eq> Eq for Ptr<T> {}

impl<T: Hash> Hash for Ptr<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.get().hash(state);
    }
}

impl<T: fmt::Debug> fmt::Debug for Ptr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ptr")
            .field("value", &self.get())
            .field("frozen", &self.is_frozen())
            .finish()
    }
}

impl<T: Reflect> Reflect for Ptr<T> {
    const KIND: Kind = Kind::Pointer;

    fn node(&mut self) -> Node<'_> {
        Node::Pointer(self)
    }
}

impl<T: Reflect> PointerNode for Ptr<T> {
    fn is_null(&self) -> bool {
        Ptr::is_null(self)
    }

    fn pointee_kind(&self) -> Kind {
        T::KIND
    }

    fn pointee(&mut self) -> Option<Node<'_>> {
        self.get_mut().map(|value| value.node())
    }

    fn store_in_place(&mut self) {
        if mem::size_of::<T>() == 0 {
            return;
        }
        if let Some(raw) = self.raw {
            let byte = raw.as_ptr().cast::<MaybeUninit<u8>>();
            // SAFETY: the pointee spans at least one byte of live storage.
            unsafe { byte.write_volatile(byte.read_volatile()) };
        }
    }

    fn freeze_pointee(&mut self, engine: &FreezeEngine) -> bool {
        self.freeze_with(engine);
        self.is_frozen()
    }
}
