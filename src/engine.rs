// Freeze Engine
//
// Purpose: the single place where bytes are copied into fresh pages and the
// pages are downgraded to read-only.
// Invariant: a region handed out by the engine is read-only. Any failure to map
// or protect aborts the process; there is no fallback to writable memory.

use crate::config::types::{FreezeConfig, FreezeError, Result};
use crate::config;
use crate::kernel::pages;
use crate::observability::metrics::metrics;
use crate::region::split::SplitLayout;
use crate::region::{PageRegion, Permission, ReadOnly};
use crate::shape::{Kind, Node, Reflect};
use crate::walker::{GraphWalker, WalkStats};
use log::{error, info, warn};
use std::ptr;
use std::sync::OnceLock;
use std::time::Instant;

/// Copies values into page-protected memory
#[derive(Debug, Clone)]
pub struct FreezeEngine {
    page_size: usize,
    lock_pages: bool,
    strict_mode: bool,
}

impl FreezeEngine {
    /// Build an engine from an already validated configuration.
    pub fn new(config: &FreezeConfig) -> Self {
        Self {
            page_size: config.page_size.unwrap_or_else(pages::os_page_size),
            lock_pages: config.lock_pages,
            strict_mode: config.strict_mode,
        }
    }

    /// The process-wide engine, built from [`config::current`] on first use.
    pub fn global() -> &'static FreezeEngine {
        static ENGINE: OnceLock<FreezeEngine> = OnceLock::new();
        ENGINE.get_or_init(|| FreezeEngine::new(config::current()))
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Copy `len` bytes from `src` into fresh pages and protect them.
    ///
    /// Returns `None` for `len == 0`; the caller keeps its original reference.
    ///
    /// # Safety
    ///
    /// `src` must be valid for reads of `len` bytes.
    pub unsafe fn copy_and_freeze(&self, src: *const u8, len: usize) -> Option<PageRegion<ReadOnly>> {
        unsafe { self.copy_and_freeze_reserved(src, len, len) }
    }

    /// Like [`copy_and_freeze`](Self::copy_and_freeze), but the region spans at
    /// least `reserve` bytes. The bytes past `len` are zero and equally frozen.
    ///
    /// # Safety
    ///
    /// `src` must be valid for reads of `len` bytes.
    pub unsafe fn copy_and_freeze_reserved(
        &self,
        src: *const u8,
        len: usize,
        reserve: usize,
    ) -> Option<PageRegion<ReadOnly>> {
        if len == 0 {
            return None;
        }

        let mut region =
            PageRegion::allocate(reserve.max(len), self.page_size).unwrap_or_else(|e| fatal(e));
        // SAFETY: the region spans at least `len` bytes, is writable and was
        // just mapped, so it cannot overlap `src`.
        unsafe { ptr::copy_nonoverlapping(src, region.as_mut_ptr(), len) };

        let frozen = region.protect().unwrap_or_else(|e| fatal(e));
        self.lock_if_configured(&frozen);
        Some(frozen)
    }

    /// Safe wrapper over [`copy_and_freeze`](Self::copy_and_freeze) for byte slices.
    pub fn freeze_bytes(&self, bytes: &[u8]) -> Option<PageRegion<ReadOnly>> {
        // SAFETY: a slice is valid for reads of its own length.
        unsafe { self.copy_and_freeze(bytes.as_ptr(), bytes.len()) }
    }

    /// Place a record image in a split layout: the first `prefix_len` bytes
    /// stay writable, the rest is protected.
    ///
    /// # Safety
    ///
    /// `src` must be valid for reads of `image_len` bytes.
    pub unsafe fn freeze_split(&self, src: *const u8, image_len: usize, prefix_len: usize) -> SplitLayout {
        // SAFETY: forwarded from the caller.
        let layout = unsafe { SplitLayout::place(src, image_len, prefix_len, self.page_size) }
            .unwrap_or_else(|e| fatal(e));
        self.lock_if_configured(layout.payload());
        layout
    }

    fn lock_if_configured<P: Permission>(&self, region: &PageRegion<P>) {
        if !self.lock_pages {
            return;
        }
        if let Err(e) = region.lock() {
            metrics().lock_failures.inc();
            if self.strict_mode {
                fatal(e);
            }
            warn!("Frozen region left unlocked: {}", e);
        }
    }

    /// Freeze the value behind a pointer. Single level.
    pub fn freeze_single<T: Reflect>(&self, mut value: T) -> Result<T> {
        match value.node() {
            Node::Pointer(pointer) => {
                pointer.freeze_pointee(self);
            }
            other => return Err(invalid_shape("freeze_single", "pointer", other.kind())),
        }
        Ok(value)
    }

    /// Freeze the backing buffer of a sequence. Elements are not descended.
    pub fn freeze_sequence<T: Reflect>(&self, mut value: T) -> Result<T> {
        match value.node() {
            Node::Sequence(sequence) => {
                sequence.freeze_backing(self);
            }
            other => return Err(invalid_shape("freeze_sequence", "sequence", other.kind())),
        }
        Ok(value)
    }

    /// Freeze the buckets and control record of a map. Keys and values are
    /// not descended.
    pub fn freeze_map<T: Reflect>(&self, mut value: T) -> Result<T> {
        match value.node() {
            Node::Map(map) => {
                map.freeze_control(self);
            }
            other => return Err(invalid_shape("freeze_map", "map", other.kind())),
        }
        Ok(value)
    }

    /// Freeze everything reachable from `value`.
    pub fn freeze_deep<T: Reflect>(&self, value: T) -> Result<T> {
        self.freeze_deep_with_stats(value).map(|(value, _)| value)
    }

    /// [`freeze_deep`](Self::freeze_deep), also returning traversal statistics.
    pub fn freeze_deep_with_stats<T: Reflect>(&self, mut value: T) -> Result<(T, WalkStats)> {
        if !T::KIND.is_freeze_root() {
            return Err(invalid_shape(
                "freeze_deep",
                "pointer, sequence or map",
                T::KIND,
            ));
        }

        let started = Instant::now();
        let mut walker = GraphWalker::new(self);
        walker.walk(value.node());
        let stats = walker.into_stats();

        let elapsed = started.elapsed();
        metrics().record_deep_freeze(elapsed);
        info!(
            "Deep freeze complete: {} nodes, {} regions, depth {}, {:?}",
            stats.nodes_visited,
            stats.regions_frozen(),
            stats.max_depth,
            elapsed
        );
        Ok((value, stats))
    }
}

fn invalid_shape(operation: &'static str, expected: &'static str, found: Kind) -> FreezeError {
    FreezeError::InvalidShape {
        operation,
        expected,
        found,
    }
}

/// Log and abort. Frozen memory must never silently become writable memory.
pub(crate) fn fatal(err: FreezeError) -> ! {
    error!("pagefreeze: unrecoverable failure: {}", err);
    std::process::abort()
}
