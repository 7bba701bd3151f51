//! Anonymous page mapping and protection.
//!
//! Every function here is a direct wrapper over one syscall. Callers own the
//! ranges they pass in; nothing in this module tracks ownership.

use crate::config::types::{FreezeError, Result};
use nix::errno::Errno;
use nix::sys::mman::{self, MapFlags, ProtFlags};
use nix::unistd::{sysconf, SysconfVar};
use std::num::NonZeroUsize;
use std::ptr::NonNull;
use std::sync::OnceLock;

/// Used only when sysconf cannot report a page size.
const FALLBACK_PAGE_SIZE: usize = 4096;

static OS_PAGE_SIZE: OnceLock<usize> = OnceLock::new();

/// The host page size as reported by sysconf(_SC_PAGESIZE).
pub fn os_page_size() -> usize {
    *OS_PAGE_SIZE.get_or_init(|| match sysconf(SysconfVar::PAGE_SIZE) {
        Ok(Some(size)) if size > 0 => size as usize,
        other => {
            log::warn!(
                "sysconf(PAGE_SIZE) returned {:?}, assuming {} bytes",
                other,
                FALLBACK_PAGE_SIZE
            );
            FALLBACK_PAGE_SIZE
        }
    })
}

/// Round `len` up to a whole number of pages. Zero stays zero.
pub fn round_to_pages(len: usize, page_size: usize) -> usize {
    debug_assert!(page_size.is_power_of_two());
    len.div_ceil(page_size) * page_size
}

/// Map `len` bytes of private anonymous memory, readable and writable.
pub fn map_read_write(len: usize) -> Result<NonNull<u8>> {
    let length = NonZeroUsize::new(len).ok_or(FreezeError::Map {
        len,
        source: Errno::EINVAL,
    })?;

    // SAFETY: anonymous private mapping without an address hint; the kernel
    // picks a fresh range that aliases no existing Rust object.
    let addr = unsafe {
        mman::mmap_anonymous(
            None,
            length,
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
            MapFlags::MAP_PRIVATE,
        )
    }
    .map_err(|source| FreezeError::Map { len, source })?;

    Ok(addr.cast())
}

/// Drop write permission on `[addr, addr + len)`.
///
/// # Safety
///
/// `addr` must be page-aligned and the range must lie inside a mapping owned
/// by the caller. No live `&mut` may point into the range afterwards.
pub unsafe fn protect_read_only(addr: NonNull<u8>, len: usize) -> Result<()> {
    unsafe { mman::mprotect(addr.cast(), len, ProtFlags::PROT_READ) }
        .map_err(|source| FreezeError::Protect { len, source })
}

/// Release `[addr, addr + len)` back to the kernel.
///
/// # Safety
///
/// The range must be owned by the caller and no reference into it may be used
/// after this call.
pub unsafe fn unmap(addr: NonNull<u8>, len: usize) -> Result<()> {
    unsafe { mman::munmap(addr.cast(), len) }.map_err(|source| FreezeError::Unmap { len, source })
}

/// Pin `[addr, addr + len)` in RAM.
///
/// # Safety
///
/// The range must be mapped and owned by the caller.
pub unsafe fn lock(addr: NonNull<u8>, len: usize) -> Result<()> {
    unsafe { mman::mlock(addr.cast(), len) }.map_err(|source| FreezeError::Lock { len, source })
}
