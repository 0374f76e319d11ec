//! Shared harness: every scenario runs on its own OS thread so it sees a
//! fresh scheduler, and panics propagate to the test that asked for them.

use std::panic::resume_unwind;

pub fn scenario<F: FnOnce() + Send + 'static>(f: F) {
    if let Err(payload) = std::thread::spawn(f).join() {
        resume_unwind(payload);
    }
}

pub fn scenario_fatal<F: FnOnce() + Send + 'static>(f: F) {
    assert!(
        std::thread::spawn(f).join().is_err(),
        "scenario was expected to be fatal"
    );
}
