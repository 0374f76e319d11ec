//! Cooperative condition variable.

use crate::fault::fatal;
use crate::sched;
use crate::thread::{Tid, ThreadState};

use super::mutex::MutexGuard;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::marker::PhantomData;

/// Condition variable for cooperative threads, paired with a
/// [`Mutex`](super::Mutex) at each wait.
///
/// There is no preemption, so enqueue-unlock-suspend is one uninterruptible
/// step from every other thread's point of view: a wakeup sent after the
/// mutex is released can never be lost. Waiters are woken in the order they
/// began waiting.
pub struct Condvar {
    waiters: RefCell<VecDeque<Tid>>,
    _single_stream: PhantomData<*const ()>,
}

impl Condvar {
    pub fn new() -> Self {
        Condvar {
            waiters: RefCell::new(VecDeque::new()),
            _single_stream: PhantomData,
        }
    }

    /// Release the guard's mutex, wait to be notified, then reacquire.
    ///
    /// As with any condition variable, the awaited predicate must be
    /// rechecked after return: another thread may run between the notify
    /// and the reacquisition. Fatal from the main stream, which cannot
    /// block.
    pub fn wait<'a, T: ?Sized>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        let me = match sched::current() {
            Some(tid) => tid,
            None => fatal!("the main execution stream cannot wait on a condition"),
        };
        self.waiters.borrow_mut().push_back(me);

        let lock = guard.mutex();
        drop(guard); // releases the mutex; nothing else runs until we suspend
        sched::suspend(ThreadState::Blocked);
        lock.lock()
    }

    /// Wake the longest-waiting thread, if any.
    pub fn notify_one(&self) {
        let woken = self.waiters.borrow_mut().pop_front();
        if let Some(tid) = woken {
            sched::unsuspend(tid);
        }
    }

    /// Wake every waiting thread, preserving their waiting order.
    pub fn notify_all(&self) {
        loop {
            let woken = self.waiters.borrow_mut().pop_front();
            match woken {
                Some(tid) => sched::unsuspend(tid),
                None => break,
            }
        }
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Condvar::new()
    }
}

#[cfg(test)]
mod tests {
    use super::super::Mutex;
    use super::*;
    use crate::sched::{join, spawn, yield_now, YieldOutcome};
    use std::panic::resume_unwind;
    use std::rc::Rc;

    fn scenario<F: FnOnce() + Send + 'static>(f: F) {
        if let Err(payload) = std::thread::spawn(f).join() {
            resume_unwind(payload);
        }
    }

    #[test]
    fn notify_with_no_waiters_is_a_no_op() {
        scenario(|| {
            let cond = Condvar::new();
            cond.notify_one();
            cond.notify_all();
        });
    }

    #[test]
    fn notify_one_wakes_the_first_waiter() {
        scenario(|| {
            let pair = Rc::new((Mutex::new(Vec::new()), Condvar::new()));

            let mut waiters = Vec::new();
            for tag in ["first", "second"] {
                let pair = pair.clone();
                waiters.push(spawn(tag, move || {
                    let (lock, cond) = &*pair;
                    let mut guard = lock.lock();
                    guard = cond.wait(guard);
                    guard.push(tag);
                }));
            }
            // Both park on the condition.
            while yield_now() == YieldOutcome::Yielded {}

            let (lock, cond) = &*pair;
            cond.notify_one();
            join(waiters[0]);
            assert_eq!(*lock.lock(), ["first"]);

            cond.notify_one();
            join(waiters[1]);
            assert_eq!(*lock.lock(), ["first", "second"]);
        });
    }

    #[test]
    fn notify_all_wakes_everyone_in_waiting_order() {
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
            while yield_now() == YieldOutcome::Yielded {}

            pair.1.notify_all();
            for tid in waiters {
                join(tid);
            }
            assert_eq!(*pair.0.lock(), ["a", "b", "c"]);
        });
    }

    #[test]
    fn wait_from_main_is_fatal() {
        assert!(std::thread::spawn(|| {
            let lock = Mutex::new(());
            let cond = Condvar::new();
            let _guard = cond.wait(lock.lock());
        })
        .join()
        .is_err());
    }
}
