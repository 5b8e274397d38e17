//! Exercises interesting interleavings of borrows, lifetimes, and
//! reclamation around the raw-pointer-heavy subsystems: the RCU list's
//! zombie stack and the RCU engine's deferred-destruction queue. Intended to
//! be run under `cargo miri test --test miri`.

use concurrent_structures::rcu::RcuList;
use concurrent_structures::rcu::Gc;
use std::thread;

#[test]
pub fn nested_readers_overlapping_a_writer() {
    let list: RcuList<Box<u32>> = RcuList::new();
    let writer = list.register_writer();
    {
        let mut w = writer.write_lock();
        w.push_back(Box::new(10));
        w.push_back(Box::new(20));
    }

    let reader = list.register_reader();
    let outer = reader.read_lock();
    let ten = outer.find(|v| **v == 10).map(|h| **h.get());
    let middle = reader.read_lock();
    let twenty = middle.find(|v| **v == 20).map(|h| **h.get());
    let inner = reader.read_lock();

    assert_eq!(ten, Some(10));
    assert_eq!(twenty, Some(20));
    assert_eq!(inner.begin().map(|h| **h.get()), Some(10));

    drop(outer);
    drop(middle);
    drop(inner);
}

#[test]
pub fn erase_defers_reclamation_until_overlapping_reader_leaves() {
    let list: RcuList<Box<u32>> = RcuList::new();
    let writer = list.register_writer();
    let target = {
        let mut w = writer.write_lock();
        w.push_back(Box::new(1));
        let target = w.push_back(Box::new(2));
        w.push_back(Box::new(3));
        target
    };

    let reader = list.register_reader();
    let in_flight = reader.read_lock();
    let seen = in_flight.find(|v| **v == 2).map(|h| **h.get());
    assert_eq!(seen, Some(2));

    {
        let mut w = writer.write_lock();
        w.erase(target);
    }

    // `in_flight` opened before the erase, so the value it already read
    // back stays valid; the node itself isn't freed until this reader (and
    // the writer's own zombie record) have both been walked past.
    assert_eq!(seen, Some(2));
    drop(in_flight);

    let reader2 = list.register_reader();
    let r2 = reader2.read_lock();
    assert!(r2.find(|v| **v == 2).is_none());
    drop(r2);

    drop(list);
}

#[test]
pub fn deferred_destruction_runs_exactly_once_across_threads() {
    let gc = Gc::new();

    let guard = gc.enter();
    let boxed = Box::new(42u32);
    gc.defer_destroy(boxed).unwrap();

    let t1 = thread::spawn({
        let generation = guard.generation();
        move || generation
    });
    let read_generation = t1.join().unwrap();
    assert_eq!(read_generation, guard.generation());

    drop(guard);
    gc.synchronize();
}
