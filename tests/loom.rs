//! Model-checks the three subsystems whose correctness hinges on a precise
//! cross-thread ordering: the write-preferring RW lock, the RCU engine, and
//! the RCU-protected list. Only compiled/run under
//! `RUSTFLAGS="--cfg loom" cargo test --test loom --release`; loom's state
//! space explodes quickly, so each model here is deliberately tiny (two or
//! three threads, a handful of operations).

mod util;

#[cfg(loom)]
mod loom_tests {
    use concurrent_structures::rcu::Gc;
    use concurrent_structures::sync::rwlock::RwLock;
    use loom::sync::Arc;
    use loom::thread;

    #[test]
    fn rwlock_mutual_exclusion() {
        loom::model(|| {
            let lock = Arc::new(RwLock::new(0u32));

            let writers: Vec<_> = (0..2)
                .map(|_| {
                    let lock = Arc::clone(&lock);
                    thread::spawn(move || {
                        let mut guard = lock.write();
                        *guard += 1;
                    })
                })
                .collect();

            for w in writers {
                w.join().unwrap();
            }

            assert_eq!(*lock.read(), 2);
        });
    }

    #[test]
    fn rwlock_reader_writer_interleaving() {
        loom::model(|| {
            let lock = Arc::new(RwLock::new(0u32));

            let writer = {
                let lock = Arc::clone(&lock);
                thread::spawn(move || {
                    *lock.write() = 1;
                })
            };

            let reader = {
                let lock = Arc::clone(&lock);
                thread::spawn(move || {
                    let v = *lock.read();
                    assert!(v == 0 || v == 1);
                })
            };

            writer.join().unwrap();
            reader.join().unwrap();
            assert_eq!(*lock.read(), 1);
        });
    }

    #[test]
    fn gc_reader_never_sees_a_collected_generation_finish_early() {
        loom::model(|| {
            let gc = Arc::new(Gc::new());

            let reader = {
                let gc = Arc::clone(&gc);
                thread::spawn(move || {
                    let guard = gc.enter();
                    let generation = guard.generation();
                    // The refcount for this generation must still be
                    // nonzero while we hold the guard.
                    assert!(gc.rc_for_generation(generation).unwrap_or(0) >= 1);
                    drop(guard);
                })
            };

            let writer = {
                let gc = Arc::clone(&gc);
                thread::spawn(move || {
                    gc.synchronize();
                })
            };

            reader.join().unwrap();
            writer.join().unwrap();
        });
    }
}
