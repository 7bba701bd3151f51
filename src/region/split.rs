//! Split layout
//!
//! One mapping treated as two adjacent regions: a control page that stays
//! writable and a payload that is downgraded to read-only. A record image is
//! placed so that its first `prefix_len` bytes end exactly at the page
//! boundary; those bytes stay writable and everything after them is protected.
//!
//! ```text
//!  control page (RW)            payload (RO)
//! |........[ prefix ]|[ suffix ............ ]|
//! 0   page - prefix  page                  end
//! ```

use super::{PageRegion, ReadOnly, ReadWrite};
use crate::config::types::{FreezeError, Result};
use std::ptr::{self, NonNull};

/// A record image straddling a writable control page and a read-only payload
#[derive(Debug)]
pub struct SplitLayout {
    control: PageRegion<ReadWrite>,
    payload: PageRegion<ReadOnly>,
    image: NonNull<u8>,
}

impl SplitLayout {
    /// Copy `image_len` bytes from `src` into a fresh split mapping and
    /// protect everything after the first `prefix_len` bytes.
    ///
    /// # Safety
    ///
    /// `src` must be valid for reads of `image_len` bytes.
    pub unsafe fn place(
        src: *const u8,
        image_len: usize,
        prefix_len: usize,
        page_size: usize,
    ) -> Result<Self> {
        if prefix_len > page_size || prefix_len > image_len {
            return Err(FreezeError::Layout(format!(
                "mutable prefix of {} bytes does not fit a {}-byte image on a {}-byte page",
                prefix_len, image_len, page_size
            )));
        }

        // The payload must own at least one page even when the whole image is prefix.
        let suffix_len = (image_len - prefix_len).max(1);
        let mut control = PageRegion::<ReadWrite>::allocate(page_size + suffix_len, page_size)?;

        let offset = page_size - prefix_len;
        // SAFETY: `offset + image_len <= page_size + suffix_len <= control.len()`
        // and the fresh mapping cannot overlap `src`.
        let image = unsafe {
            let dst = control.as_mut_ptr().add(offset);
            ptr::copy_nonoverlapping(src, dst, image_len);
            NonNull::new_unchecked(dst)
        };

        let payload = control.split_off(page_size)?.protect()?;
        Ok(Self {
            control,
            payload,
            image,
        })
    }

    /// Start of the placed image, inside the control page.
    pub fn image_ptr(&self) -> NonNull<u8> {
        self.image
    }

    pub fn control(&self) -> &PageRegion<ReadWrite> {
        &self.control
    }

    pub fn payload(&self) -> &PageRegion<ReadOnly> {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.control.len() + self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
