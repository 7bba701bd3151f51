/// This test should FAIL to compile
/// A read-only region has no mutable accessors

use pagefreeze::kernel::pages::os_page_size;
use pagefreeze::region::{PageRegion, ReadWrite};

fn main() {
    let region = PageRegion::<ReadWrite>::allocate(1, os_page_size()).unwrap();
    let mut frozen = region.protect().unwrap();

    // This should fail: as_mut_slice only exists on PageRegion<ReadWrite>
    frozen.as_mut_slice()[0] = 1;
}
