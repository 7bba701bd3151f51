//! Region accounting across freeze and release
//!
//! The registry is process-global, so this binary holds a single test and
//! nothing else maps regions concurrently.

use pagefreeze::observability::snapshot;
use pagefreeze::{freeze_deep, freeze_map, freeze_sequence, freeze_single, Map, Ptr, Seq};

#[test]
fn test_live_regions_return_to_baseline() {
    let _ = env_logger::builder().is_test(true).try_init();
    let baseline = snapshot();

    // Nil and empty inputs map nothing
    let p: Ptr<u64> = freeze_single(Ptr::null()).unwrap();
    let xs: Seq<u64> = freeze_sequence(Seq::new()).unwrap();
    let m: Map<u8, u8> = freeze_map(Map::nil()).unwrap();
    assert_eq!(snapshot().regions_mapped, baseline.regions_mapped);
    drop((p, xs, m));

    // One region per pointer
    let p = freeze_single(Ptr::new(7u64)).unwrap();
    let frozen = snapshot();
    assert_eq!(frozen.live_regions, baseline.live_regions + 1);
    assert_eq!(frozen.regions_protected, baseline.regions_protected + 1);
    drop(p);
    assert_eq!(snapshot().live_regions, baseline.live_regions);

    // Buckets plus the control/payload pair of the split layout
    let m: Map<u32, u32> = (0..10).map(|i| (i, i)).collect();
    let m = freeze_map(m).unwrap();
    let frozen = snapshot();
    assert_eq!(frozen.live_regions, baseline.live_regions + 3);
    assert_eq!(frozen.regions_split, baseline.regions_split + 1);
    drop(m);
    assert_eq!(snapshot().live_regions, baseline.live_regions);

    // Refreezing releases the previous regions
    let p = freeze_single(Ptr::new(1u8)).unwrap();
    let p = freeze_single(p).unwrap();
    assert_eq!(snapshot().live_regions, baseline.live_regions + 1);
    drop(p);

    // A deep graph: root, two leaves and the sequence buffer
    let graph: Ptr<Seq<Ptr<u16>>> = Ptr::new(vec![Ptr::new(1), Ptr::new(2)].into());
    let graph = freeze_deep(graph).unwrap();
    assert_eq!(snapshot().live_regions, baseline.live_regions + 4);
    drop(graph);

    let after = snapshot();
    assert_eq!(after.live_regions, baseline.live_regions);
    assert_eq!(after.live_bytes, baseline.live_bytes);
    assert_eq!(after.release_failures, baseline.release_failures);
    assert_eq!(after.deep_freezes, baseline.deep_freezes + 1);
}
