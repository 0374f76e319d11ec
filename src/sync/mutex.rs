//! Cooperative mutex.
//!
//! Blocking is built entirely on the scheduler's suspend/unsuspend
//! protocol: a contended `lock` parks the caller as blocked, and `unlock`
//! hands the mutex to the first waiter before waking it, so ownership
//! transfers in strict FIFO order and a woken thread never has to race for
//! the lock it was promised.

use crate::fault::fatal;
use crate::sched;
use crate::thread::{Tid, ThreadState};

use std::cell::{RefCell, UnsafeCell};
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

struct LockState {
    locked: bool,
    /// Holder while locked; `None` means the main stream holds it.
    owner: Option<Tid>,
    /// Threads parked in arrival order, each woken by a hand-off.
    waiters: VecDeque<Tid>,
}

/// Mutual exclusion between cooperative threads of one scheduler.
///
/// Not `Send` or `Sync`: thread ids and the blocking protocol are only
/// meaningful on the OS thread whose scheduler created the waiters.
pub struct Mutex<T: ?Sized> {
    state: RefCell<LockState>,
    _single_stream: PhantomData<*const ()>,
    value: UnsafeCell<T>,
}

/// RAII guard; the mutex unlocks when the guard drops.
pub struct MutexGuard<'a, T: ?Sized + 'a> {
    lock: &'a Mutex<T>,
}

impl<T> Mutex<T> {
    pub fn new(value: T) -> Self {
        Mutex {
            state: RefCell::new(LockState {
                locked: false,
                owner: None,
                waiters: VecDeque::new(),
            }),
            _single_stream: PhantomData,
            value: UnsafeCell::new(value),
        }
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Acquire the mutex, suspending the caller while it is held.
    ///
    /// Spawned threads park as blocked and are resumed owning the lock.
    /// The main stream cannot park, so it drives the scheduler until the
    /// mutex frees up; if nothing is runnable while it waits, that wait
    /// can never end and is reported as a fatal deadlock. Re-locking a
    /// mutex the caller already holds is likewise fatal.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        let me = sched::current();
        loop {
            {
                let mut state = self.state.borrow_mut();
                if !state.locked {
                    state.locked = true;
                    state.owner = me;
                    return MutexGuard { lock: self };
                }
                if state.owner == me {
                    fatal!("relock of a mutex the caller already holds");
                }
                if let Some(tid) = me {
                    state.waiters.push_back(tid);
                }
            } // the borrow must end before control can transfer

            match me {
                Some(_) => {
                    sched::suspend(ThreadState::Blocked);
                    // Unlock handed the mutex over before waking us.
                    debug_assert!(self.state.borrow().owner == me);
                    return MutexGuard { lock: self };
                }
                None => {
                    if sched::run_queue_empty() {
                        fatal!("deadlock: main stream waiting on a mutex with nothing runnable");
                    }
                    sched::schedule();
                }
            }
        }
    }

    /// Acquire without blocking; `None` if the mutex is held.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        let mut state = self.state.borrow_mut();
        if state.locked {
            None
        } else {
            state.locked = true;
            state.owner = sched::current();
            drop(state);
            Some(MutexGuard { lock: self })
        }
    }

    fn unlock(&self) {
        let woken = {
            let mut state = self.state.borrow_mut();
            debug_assert!(state.locked, "unlock of an unlocked mutex");
            match state.waiters.pop_front() {
                Some(next) => {
                    // Hand-off: the waiter owns the mutex before it runs.
                    state.owner = Some(next);
                    Some(next)
                }
                None => {
                    state.locked = false;
                    state.owner = None;
                    None
                }
            }
        };
        if let Some(next) = woken {
            sched::unsuspend(next);
        }
    }
}

impl<'a, T: ?Sized> MutexGuard<'a, T> {
    /// The mutex this guard locks; used by condition waits to reacquire.
    pub(super) fn mutex(&self) -> &'a Mutex<T> {
        self.lock
    }
}

impl<'a, T: ?Sized> Deref for MutexGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.lock.value.get() }
    }
}

impl<'a, T: ?Sized> DerefMut for MutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<'a, T: ?Sized> Drop for MutexGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::{join, spawn, yield_now};
    use std::panic::resume_unwind;
    use std::rc::Rc;

    fn scenario<F: FnOnce() + Send + 'static>(f: F) {
        if let Err(payload) = std::thread::spawn(f).join() {
            resume_unwind(payload);
        }
    }

    #[test]
    fn uncontended_lock_and_unlock() {
        scenario(|| {
            let m = Mutex::new(41);
            {
                let mut guard = m.lock();
                *guard += 1;
            }
            assert_eq!(*m.lock(), 42);
        });
    }

    #[test]
    fn try_lock_reports_contention() {
        scenario(|| {
            let m = Mutex::new(());
            let guard = m.try_lock().unwrap();
            assert!(m.try_lock().is_none());
            drop(guard);
            assert!(m.try_lock().is_some());
        });
    }

    #[test]
    fn contenders_acquire_in_blocking_order() {
        scenario(|| {
            let m = Rc::new(Mutex::new(Vec::new()));
            let held = m.lock();

            let mut workers = Vec::new();
            for tag in ["a", "b", "c"] {
                let m = m.clone();
                workers.push(spawn(tag, move || m.lock().push(tag)));
            }
            // Let all three block on the mutex, in spawn order.
            while yield_now() == crate::sched::YieldOutcome::Yielded {}
            drop(held);

            for tid in workers {
                join(tid);
            }
            assert_eq!(*m.lock(), ["a", "b", "c"]);
        });
    }

    #[test]
    fn relock_is_fatal() {
        assert!(std::thread::spawn(|| {
            let m = Mutex::new(());
            let _guard = m.lock();
            let _second = m.lock();
        })
        .join()
        .is_err());
    }
}
