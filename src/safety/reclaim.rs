/// Reclamation of frozen regions
/// A ticket is registered immediately after a successful mapping and is the
/// only owner of that range. Dropping the ticket unmaps the range.
use crate::config::types::{FreezeError, Result};
use crate::kernel::pages;
use crate::observability::metrics::metrics;
use log::{debug, warn};
use std::ptr::NonNull;

/// Ownership of one mapped byte range
#[derive(Debug)]
pub struct ReclaimTicket {
    base: NonNull<u8>,
    len: usize,
}

// SAFETY: the ticket owns its range exclusively; the raw pointer is never
// shared by the ticket itself.
unsafe impl Send for ReclaimTicket {}
unsafe impl Sync for ReclaimTicket {}

impl ReclaimTicket {
    /// Take ownership of a range returned by [`pages::map_read_write`].
    ///
    /// # Safety
    ///
    /// `[base, base + len)` must be a live mapping that nothing else will unmap.
    pub unsafe fn register(base: NonNull<u8>, len: usize) -> Self {
        debug!("Registered region {:p} ({} bytes)", base, len);
        metrics().record_mapped(len);
        Self { base, len }
    }

    /// Split the range at `at`, keeping `[base, base + at)` and returning a
    /// ticket for the remainder. Both halves are unmapped independently.
    pub fn split_off(&mut self, at: usize, page_size: usize) -> Result<ReclaimTicket> {
        if at == 0 || at >= self.len || at % page_size != 0 {
            return Err(FreezeError::Layout(format!(
                "cannot split a {}-byte region at offset {}",
                self.len, at
            )));
        }

        // SAFETY: `at < len`, so the tail pointer stays inside the mapping.
        let tail = unsafe { NonNull::new_unchecked(self.base.as_ptr().add(at)) };
        let tail_len = self.len - at;
        self.len = at;

        metrics().record_split();
        debug!(
            "Split region {:p} into {} + {} bytes",
            self.base, self.len, tail_len
        );
        Ok(ReclaimTicket {
            base: tail,
            len: tail_len,
        })
    }

    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for ReclaimTicket {
    fn drop(&mut self) {
        // SAFETY: the ticket is the sole owner of the range and is going away.
        match unsafe { pages::unmap(self.base, self.len) } {
            Ok(()) => {
                debug!("Released region {:p} ({} bytes)", self.base, self.len);
                metrics().record_released(self.len);
            }
            Err(e) => {
                // The range leaks; nothing can write to it either way.
                warn!("Failed to release region {:p}: {}", self.base, e);
                metrics().record_release_failure(self.len);
            }
        }
    }
}
