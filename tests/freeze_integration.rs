//! Integration tests for the freeze entry points
//!
//! Writes into frozen memory kill the process, so every write-side check runs
//! in a forked child and asserts on how the child ended.

use pagefreeze::testing::fault_probe::{run_in_child, ProbeOutcome};
use pagefreeze::{
    freeze_deep, freeze_map, freeze_sequence, freeze_single, reflect_record, FreezeError, Kind,
    Map, Ptr, Seq,
};
use std::hint::black_box;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn assert_faults<F: FnOnce()>(body: F) {
    init_logging();
    let outcome = run_in_child(body).unwrap();
    assert!(outcome.is_fault(), "expected a protection fault, got {:?}", outcome);
}

fn assert_completes<F: FnOnce()>(body: F) {
    init_logging();
    let outcome = run_in_child(body).unwrap();
    assert_eq!(outcome, ProbeOutcome::Completed { code: 0 });
}

struct Foo {
    s: String,
    ip: Ptr<i64>,
    bs: Seq<Ptr<bool>>,
}

reflect_record!(Foo {
    exported s,
    exported ip,
    exported bs,
});

fn frozen_foo() -> Ptr<Foo> {
    let foo = Ptr::new(Foo {
        s: "foo".to_string(),
        ip: Ptr::new(0),
        bs: vec![Ptr::new(false)].into(),
    });
    freeze_deep(foo).unwrap()
}

struct Guarded {
    visible: Ptr<i64>,
    hidden: Ptr<i64>,
}

reflect_record!(Guarded {
    exported visible,
    private hidden,
});

struct Flags {
    bs: [Ptr<bool>; 3],
}

reflect_record!(Flags { exported bs });

#[test]
fn test_frozen_scalar_reads_back() {
    let x = freeze_single(Ptr::new(3i64)).unwrap();
    assert!(x.is_frozen());
    assert_eq!(*x, 3);
}

#[test]
fn test_write_frozen_scalar_faults() {
    assert_faults(|| {
        let mut x = freeze_single(Ptr::new(3i64)).unwrap();
        *x += 1;
        black_box(&x);
    });
}

#[test]
fn test_write_frozen_string_pointer_faults() {
    assert_faults(|| {
        let mut s = freeze_single(Ptr::new(String::from("foo"))).unwrap();
        *s = String::from("bar");
        black_box(&s);
    });
}

#[test]
fn test_write_frozen_sequence_element_faults() {
    assert_faults(|| {
        let mut xs = freeze_sequence(Seq::from_vec(vec![1, 2, 3])).unwrap();
        xs[0] += 1;
        black_box(&xs);
    });
}

#[test]
fn test_append_into_spare_capacity_faults() {
    assert_faults(|| {
        let mut xs: Seq<i32> = Seq::with_capacity(4);
        xs.extend([0, 0, 0]);
        let mut xs = freeze_sequence(xs).unwrap();
        xs.push(5);
        black_box(&xs);
    });
}

#[test]
fn test_append_at_full_capacity_reallocates() {
    let mut xs: Seq<i32> = vec![1, 2, 3].into();
    xs.shrink_to_fit();
    let mut xs = freeze_sequence(xs).unwrap();
    assert_eq!(xs.len(), xs.capacity());

    xs.push(4);
    assert!(!xs.is_frozen());
    assert_eq!(&xs[..], &[1, 2, 3, 4]);
}

#[test]
fn test_frozen_map_reads_succeed() {
    let map: Map<i32, i32> = (0..50).map(|i| (i, i * i)).collect();
    let map = freeze_map(map).unwrap();

    assert!(map.is_frozen());
    assert_eq!(map.len(), 50);
    assert_eq!(map.get(&7), Some(&49));
    assert_eq!(map.get(&50), None);
    let mut keys: Vec<i32> = map.keys().copied().collect();
    keys.sort_unstable();
    assert_eq!(keys, (0..50).collect::<Vec<_>>());
    assert_eq!(map.active_iterators(), 0);
}

#[test]
fn test_insert_into_frozen_map_faults() {
    assert_faults(|| {
        let mut m = freeze_map(Map::from_iter([(1, 1)])).unwrap();
        m.insert(2, 2);
        black_box(&m);
    });
}

#[test]
fn test_overwrite_with_same_value_faults() {
    assert_faults(|| {
        let mut m = freeze_map(Map::from_iter([(1, 1)])).unwrap();
        m.insert(1, 1);
        black_box(&m);
    });
}

#[test]
fn test_delete_from_frozen_map_faults() {
    assert_faults(|| {
        let mut m = freeze_map(Map::from_iter([(1, 1)])).unwrap();
        m.remove(&1);
        black_box(&m);
    });
}

#[test]
fn test_write_deep_frozen_sequence_pointee_faults() {
    assert_faults(|| {
        let mut f = frozen_foo();
        *f.bs[0] = true;
        black_box(&f);
    });
}

#[test]
fn test_replace_deep_frozen_sequence_element_faults() {
    assert_faults(|| {
        let mut f = frozen_foo();
        f.bs[0] = Ptr::new(true);
        black_box(&f);
    });
}

#[test]
fn test_write_deep_frozen_pointer_member_faults() {
    assert_faults(|| {
        let mut f = frozen_foo();
        *f.ip = 8;
        black_box(&f);
    });
}

#[test]
fn test_write_deep_frozen_string_member_faults() {
    assert_faults(|| {
        let mut f = frozen_foo();
        f.s = "bar".to_string();
        black_box(&f);
    });
}

#[test]
fn test_write_deep_frozen_sequence_of_records_faults() {
    assert_faults(|| {
        let foos: Seq<Foo> = vec![Foo {
            s: "foo".to_string(),
            ip: Ptr::new(0),
            bs: vec![Ptr::new(true)].into(),
        }]
        .into();
        let mut foos = freeze_deep(foos).unwrap();
        *foos[0].bs[0] = false;
        black_box(&foos);
    });
}

#[test]
fn test_write_deep_frozen_array_element_faults() {
    assert_faults(|| {
        let flags = Ptr::new(Flags {
            bs: [Ptr::new(false), Ptr::null(), Ptr::null()],
        });
        let mut flags = freeze_deep(flags).unwrap();
        *flags.bs[0] = true;
        black_box(&flags);
    });
}

#[test]
fn test_write_deep_frozen_map_key_faults() {
    assert_faults(|| {
        let m: Map<Ptr<i32>, i32> = Map::from_iter([(Ptr::new(0), 1)]);
        let m = freeze_deep(m).unwrap();
        for key in m.keys() {
            let target = key.as_ptr() as *mut i32;
            // SAFETY: mapped and aligned; only the protection is under test.
            unsafe { target.write_volatile(1) };
        }
        black_box(&m);
    });
}

#[test]
fn test_write_deep_frozen_map_value_faults() {
    assert_faults(|| {
        let m: Map<i32, Ptr<i32>> = Map::from_iter([(1, Ptr::new(0))]);
        let mut m = freeze_deep(m).unwrap();
        if let Some(value) = m.get_mut(&1) {
            **value = 3;
        }
        black_box(&m);
    });
}

#[test]
fn test_deep_freezing_twice_faults() {
    assert_faults(|| {
        let flags = Ptr::new(Flags {
            bs: [Ptr::new(true), Ptr::new(false), Ptr::new(true)],
        });
        let flags = freeze_deep(flags).unwrap();
        let again = freeze_deep(flags);
        black_box(&again);
    });
}

#[test]
fn test_deep_freezing_a_scalar_pointer_twice_faults() {
    assert_faults(|| {
        let p = freeze_deep(Ptr::new(5u64)).unwrap();
        let again = freeze_deep(p);
        black_box(&again);
    });
}

#[test]
fn test_deep_freezing_a_scalar_sequence_twice_faults() {
    assert_faults(|| {
        let xs: Seq<u64> = vec![1, 2, 3].into();
        let xs = freeze_deep(xs).unwrap();
        let again = freeze_deep(xs);
        black_box(&again);
    });
}

#[test]
fn test_deep_freezing_a_map_twice_faults() {
    assert_faults(|| {
        let m: Map<u8, Ptr<u8>> = Map::from_iter([(1, Ptr::new(1))]);
        let m = freeze_deep(m).unwrap();
        let again = freeze_deep(m);
        black_box(&again);
    });
}

#[test]
fn test_deep_freezing_a_scalar_map_twice_faults() {
    assert_faults(|| {
        let m: Map<u8, u8> = Map::from_iter([(1, 1)]);
        let m = freeze_deep(m).unwrap();
        let again = freeze_deep(m);
        black_box(&again);
    });
}

#[test]
fn test_deep_frozen_scalar_roots_read_back() {
    let p = freeze_deep(Ptr::new(5u64)).unwrap();
    let xs = freeze_deep(Seq::from_vec(vec![1u64, 2, 3])).unwrap();
    assert_eq!(*p, 5);
    assert_eq!(&xs[..], &[1, 2, 3]);
}

#[test]
fn test_single_freeze_twice_is_allowed() {
    let x = freeze_single(Ptr::new(5u8)).unwrap();
    let first = x.as_ptr();
    let x = freeze_single(x).unwrap();
    assert_ne!(x.as_ptr(), first);
    assert_eq!(*x, 5);

    let m = freeze_map(Map::from_iter([(1u8, 2u8)])).unwrap();
    let m = freeze_map(m).unwrap();
    assert_eq!(m.get(&1), Some(&2));
}

#[test]
fn test_private_member_pointee_stays_writable() {
    let guarded = Ptr::new(Guarded {
        visible: Ptr::new(1),
        hidden: Ptr::new(2),
    });
    let guarded = freeze_deep(guarded).unwrap();
    assert!(guarded.visible.is_frozen());
    assert!(!guarded.hidden.is_frozen());

    assert_completes(|| {
        let target = guarded.hidden.as_ptr() as *mut i64;
        // SAFETY: the private pointee was left in its heap allocation.
        unsafe { target.write_volatile(5) };
        assert_eq!(*black_box(&guarded).hidden, 5);
    });
}

#[test]
fn test_exported_member_pointee_faults() {
    assert_faults(|| {
        let guarded = Ptr::new(Guarded {
            visible: Ptr::new(1),
            hidden: Ptr::new(2),
        });
        let guarded = freeze_deep(guarded).unwrap();
        let target = guarded.visible.as_ptr() as *mut i64;
        // SAFETY: mapped and aligned; only the protection is under test.
        unsafe { target.write_volatile(5) };
        black_box(&guarded);
    });
}

#[test]
fn test_shallow_sequence_freeze_leaves_pointees_writable() {
    let xs: Seq<Ptr<bool>> = vec![Ptr::new(false), Ptr::new(false)].into();
    let mut xs = freeze_sequence(xs).unwrap();
    assert!(xs.is_frozen());
    assert!(!xs[0].is_frozen());

    let target = xs[1].as_ptr() as *mut bool;
    // SAFETY: a shallow freeze leaves element pointees on the heap.
    unsafe { target.write_volatile(true) };
    assert!(*xs[1]);

    // Growing at full capacity moves the elements out of the frozen buffer.
    if xs.len() == xs.capacity() {
        xs.push(Ptr::new(true));
        assert!(!xs.is_frozen());
    }
}

#[test]
fn test_invalid_shapes_are_rejected() {
    let err = freeze_single(5i32).unwrap_err();
    assert!(err.is_invalid_usage());

    let err = freeze_sequence(Ptr::new(5i32)).unwrap_err();
    assert!(matches!(err, FreezeError::InvalidShape { found: Kind::Pointer, .. }));

    let err = freeze_map(Seq::from_vec(vec![1u8])).unwrap_err();
    assert!(matches!(err, FreezeError::InvalidShape { found: Kind::Sequence, .. }));

    let err = freeze_deep([Ptr::new(1u8)]).unwrap_err();
    assert!(matches!(err, FreezeError::InvalidShape { found: Kind::FixedArray, .. }));

    #[derive(Debug)]
    struct Bare {
        p: Ptr<u8>,
    }
    reflect_record!(Bare { exported p });
    let err = freeze_deep(Bare { p: Ptr::new(1) }).unwrap_err();
    assert_eq!(
        err.to_string(),
        "freeze_deep called on record value (expected pointer, sequence or map)"
    );
}

#[test]
fn test_nil_inputs_pass_through() {
    let p: Ptr<Ptr<u8>> = freeze_deep(Ptr::null()).unwrap();
    assert!(p.is_null());

    let p: Ptr<u8> = freeze_single(Ptr::null()).unwrap();
    assert!(p.is_null());

    let xs: Seq<u8> = freeze_sequence(Seq::nil()).unwrap();
    assert!(xs.is_nil());

    let xs: Seq<u8> = freeze_sequence(Seq::new()).unwrap();
    assert!(!xs.is_nil() && !xs.is_frozen());

    let m: Map<u8, u8> = freeze_map(Map::nil()).unwrap();
    assert!(m.is_nil());

    let m: Map<u8, u8> = freeze_map(Map::new()).unwrap();
    assert!(!m.is_nil() && !m.is_frozen());
}

#[test]
fn test_scenario_record_is_frozen_end_to_end() {
    struct Scenario {
        name: String,
        count: Ptr<i64>,
        tags: Seq<Ptr<bool>>,
    }
    reflect_record!(Scenario {
        exported name,
        exported count,
        exported tags,
    });

    let scenario = Ptr::new(Scenario {
        name: "release".to_string(),
        count: Ptr::new(12),
        tags: vec![Ptr::new(true), Ptr::new(false), Ptr::new(true)].into(),
    });
    let scenario = freeze_deep(scenario).unwrap();

    assert!(scenario.is_frozen());
    assert_eq!(scenario.name, "release");
    assert_eq!(*scenario.count, 12);
    assert!(scenario.count.is_frozen());
    assert!(scenario.tags.is_frozen());
    assert_eq!(
        scenario.tags.iter().map(|t| **t).collect::<Vec<_>>(),
        vec![true, false, true]
    );
    assert!(scenario.tags.iter().all(|t| t.is_frozen()));
}
