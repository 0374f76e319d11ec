//! Mutex and condition-variable scenarios driven through the public API.

mod common;

use common::{scenario, scenario_fatal};

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use weft::sync::{Condvar, Mutex};
use weft::{join, schedule, spawn, suspend, yield_now, ThreadState};

#[test]
fn mutex_hands_off_in_blocking_order() {
    scenario(|| {
        let m = Rc::new(Mutex::new(Vec::new()));
        let held = m.lock();

        let mut workers = Vec::new();
        for tag in ["first", "second", "third"] {
            let m = m.clone();
            workers.push(spawn(tag, move || m.lock().push(tag)));
        }
        // All three block on the held mutex, in spawn order.
        yield_now();
        drop(held);

        for tid in workers {
            join(tid);
        }
        assert_eq!(*m.lock(), ["first", "second", "third"]);
    });
}

#[test]
fn main_contends_by_driving_the_scheduler() {
    scenario(|| {
        let m = Rc::new(Mutex::new(0));

        let guard = m.lock();
        let contender = {
            let m = m.clone();
            spawn("contender", move || *m.lock() += 1)
        };
        schedule(); // the contender parks on the mutex
        drop(guard); // hand-off: the contender now owns the lock, queued

        // Contended from the main stream: it cannot block, so it runs the
        // queue until the mutex frees up.
        *m.lock() += 10;
        join(contender);
        assert_eq!(*m.lock(), 11);
    });
}

#[test]
fn main_blocking_on_an_orphaned_mutex_is_fatal() {
    scenario_fatal(|| {
        let m = Rc::new(Mutex::new(()));
        let holder = {
            let m = m.clone();
            spawn("holder", move || {
                let _guard = m.lock();
                // Dies holding the lock... never: parks forever instead.
                suspend(ThreadState::Blocked);
            })
        };
        let _ = holder;
        schedule();
        // The holder sleeps forever and nothing can wake it.
        let _guard = m.lock();
    });
}

#[test]
fn condvar_coordinates_a_bounded_buffer() {
    scenario(|| {
        const CAPACITY: usize = 2;
        const ITEMS: usize = 6;

        struct Buffer {
            queue: VecDeque<usize>,
            produced: usize,
        }

        let shared = Rc::new((
            Mutex::new(Buffer {
                queue: VecDeque::new(),
                produced: 0,
            }),
            Condvar::new(), // not_full
            Condvar::new(), // not_empty
        ));

        let producer = {
            let shared = shared.clone();
            spawn("producer", move || {
                let (lock, not_full, not_empty) = &*shared;
                for item in 0..ITEMS {
                    let mut buf = lock.lock();
                    while buf.queue.len() == CAPACITY {
                        buf = not_full.wait(buf);
                    }
                    buf.queue.push_back(item);
                    buf.produced += 1;
                    not_empty.notify_one();
                }
            })
        };

        let consumed = Rc::new(RefCell::new(Vec::new()));
        let consumer = {
            let shared = shared.clone();
            let consumed = consumed.clone();
            spawn("consumer", move || {
                let (lock, not_full, not_empty) = &*shared;
                for _ in 0..ITEMS {
                    let mut buf = lock.lock();
                    let item = loop {
                        match buf.queue.pop_front() {
                            Some(item) => break item,
                            None => buf = not_empty.wait(buf),
                        }
                    };
                    not_full.notify_one();
                    consumed.borrow_mut().push(item);
                }
            })
        };

        join(producer);
        join(consumer);
        assert_eq!(*consumed.borrow(), (0..ITEMS).collect::<Vec<_>>());
        assert_eq!(shared.0.lock().produced, ITEMS);
    });
}

#[test]
fn notify_one_only_releases_a_single_waiter() {
    scenario(|| {
        let pair = Rc::new((Mutex::new(0), Condvar::new()));

        let mut waiters = Vec::new();
        for i in 0..3 {
            let pair = pair.clone();
            waiters.push(spawn(&format!("waiter-{i}"), move || {
                let (lock, cond) = &*pair;
                let guard = lock.lock();
                let mut guard = cond.wait(guard);
                *guard += 1;
            }));
        }
        yield_now(); // everyone parks on the condition

        let (lock, cond) = &*pair;
        cond.notify_one();
        yield_now();
        assert_eq!(*lock.lock(), 1, "exactly one waiter woke");

        cond.notify_one();
        cond.notify_one();
        yield_now();
        assert_eq!(*lock.lock(), 3);

        for tid in waiters {
            join(tid);
        }
    });
}

#[test]
fn waiters_reacquire_serially_after_notify_all() {
    scenario(|| {
        let pair = Rc::new((Mutex::new(Vec::new()), Condvar::new()));

        let mut waiters = Vec::new();
        for tag in ["a", "b", "c"] {
            let pair = pair.clone();
            waiters.push(spawn(tag, move || {
                let (lock, cond) = &*pair;
                let guard = lock.lock();
                let mut guard = cond.wait(guard);
                guard.push(tag);
            }));
        }
        yield_now();

        pair.1.notify_all();
        for tid in waiters {
            join(tid);
        }
        assert_eq!(*pair.0.lock(), ["a", "b", "c"]);
    });
}

#[test]
fn try_lock_never_suspends() {
    scenario(|| {
        let m = Rc::new(Mutex::new(()));
        let held = m.lock();

        let m2 = m.clone();
        let prober = spawn("prober", move || {
            assert!(m2.try_lock().is_none());
        });
        yield_now();
        drop(held);
        join(prober);
        assert!(m.try_lock().is_some());
    });
}
