/// This test should FAIL to compile
/// The writable region is consumed by the transition to ReadOnly

use pagefreeze::kernel::pages::os_page_size;
use pagefreeze::region::{PageRegion, ReadWrite};

fn main() {
    let mut region = PageRegion::<ReadWrite>::allocate(1, os_page_size()).unwrap();
    let frozen = PageRegion::protect(region).unwrap();

    // This should fail: the writable handle was moved into protect
    region.as_mut_slice()[0] = 1;
    drop(frozen);
}
