//! Page regions
//!
//! A [`PageRegion`] owns a page-aligned byte range whose permission is tracked
//! in its type. The only transition is `ReadWrite -> ReadOnly`, and it consumes
//! the writable region, so a frozen range can never be handed out for writing
//! again.
//!
//! ```
//! use pagefreeze::kernel::pages::os_page_size;
//! use pagefreeze::region::{PageRegion, ReadWrite};
//!
//! let mut region = PageRegion::<ReadWrite>::allocate(3, os_page_size()).unwrap();
//! region.as_mut_slice()[..3].copy_from_slice(b"abc");
//! let frozen = region.protect().unwrap();
//! assert_eq!(&frozen.as_slice()[..3], b"abc");
//! assert!(frozen.is_read_only());
//! ```
//!
//! A read-only region exposes no mutable accessors and cannot be protected
//! again; the compile-fail cases live in `tests/typestate_compile_fail/`.

pub mod split;

use crate::config::types::Result;
use crate::kernel::pages;
use crate::observability::metrics::metrics;
use crate::safety::reclaim::ReclaimTicket;
use log::debug;
use std::marker::PhantomData;
use std::ptr::NonNull;

mod sealed {
    pub trait Sealed {}
}

/// Permission carried by a [`PageRegion`]
pub trait Permission: sealed::Sealed {
    const READ_ONLY: bool;
    const NAME: &'static str;
}

/// Type-state marker: pages are readable and writable
#[derive(Debug)]
pub struct ReadWrite;

/// Type-state marker: pages have been downgraded to read-only
#[derive(Debug)]
pub struct ReadOnly;

impl sealed::Sealed for ReadWrite {}
impl sealed::Sealed for ReadOnly {}

impl Permission for ReadWrite {
    const READ_ONLY: bool = false;
    const NAME: &'static str = "read-write";
}

impl Permission for ReadOnly {
    const READ_ONLY: bool = true;
    const NAME: &'static str = "read-only";
}

/// Owned page range with type-state permission tracking
#[derive(Debug)]
pub struct PageRegion<P: Permission> {
    ticket: ReclaimTicket,
    page_size: usize,
    /// Type-state marker (zero-sized)
    _permission: PhantomData<P>,
}

impl PageRegion<ReadWrite> {
    /// Map at least `len` bytes, rounded up to whole `page_size` units.
    pub fn allocate(len: usize, page_size: usize) -> Result<Self> {
        let rounded = pages::round_to_pages(len, page_size);
        let base = pages::map_read_write(rounded)?;
        // SAFETY: the mapping was just created and is owned by nobody else.
        let ticket = unsafe { ReclaimTicket::register(base, rounded) };
        Ok(Self {
            ticket,
            page_size,
            _permission: PhantomData,
        })
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ticket.base().as_ptr()
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: the range is mapped RW and exclusively owned through `&mut self`.
        unsafe { std::slice::from_raw_parts_mut(self.as_mut_ptr(), self.ticket.len()) }
    }

    /// Split off `[at, len)` as its own region. `at` must be page aligned.
    pub fn split_off(&mut self, at: usize) -> Result<PageRegion<ReadWrite>> {
        let tail = self.ticket.split_off(at, self.page_size)?;
        Ok(PageRegion {
            ticket: tail,
            page_size: self.page_size,
            _permission: PhantomData,
        })
    }

    /// Transition to ReadOnly. Consumes the writable region.
    pub fn protect(self) -> Result<PageRegion<ReadOnly>> {
        // SAFETY: the ticket owns a page-aligned mapping, and `self` is
        // consumed so no `&mut` into it survives.
        unsafe { pages::protect_read_only(self.ticket.base(), self.ticket.len())? };
        metrics().record_protected();
        debug!(
            "Protected region {:p} ({} bytes)",
            self.ticket.base(),
            self.ticket.len()
        );

        Ok(PageRegion {
            ticket: self.ticket,
            page_size: self.page_size,
            _permission: PhantomData,
        })
    }
}

impl<P: Permission> PageRegion<P> {
    pub fn len(&self) -> usize {
        self.ticket.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticket.is_empty()
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ticket.base().as_ptr()
    }

    pub(crate) fn base(&self) -> NonNull<u8> {
        self.ticket.base()
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the range is mapped and at least readable for the life of the ticket.
        unsafe { std::slice::from_raw_parts(self.as_ptr(), self.ticket.len()) }
    }

    pub fn is_read_only(&self) -> bool {
        P::READ_ONLY
    }

    pub fn permission(&self) -> &'static str {
        P::NAME
    }

    /// Pin the pages in RAM.
    pub fn lock(&self) -> Result<()> {
        // SAFETY: the ticket owns this mapping.
        unsafe { pages::lock(self.ticket.base(), self.ticket.len()) }
    }

    /// True when `addr` points inside this region.
    pub fn contains(&self, addr: *const u8) -> bool {
        let start = self.as_ptr() as usize;
        let addr = addr as usize;
        addr >= start && addr < start + self.len()
    }
}
