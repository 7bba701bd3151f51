/// This test should FAIL to compile
/// Protecting is a one-way transition out of ReadWrite

use pagefreeze::kernel::pages::os_page_size;
use pagefreeze::region::{PageRegion, ReadWrite};

fn main() {
    let region = PageRegion::<ReadWrite>::allocate(1, os_page_size()).unwrap();
    let frozen = region.protect().unwrap();

    // This should fail: PageRegion<ReadOnly> has no protect
    let _again = frozen.protect();
}
