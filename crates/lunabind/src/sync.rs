//! Synchronization primitives
//!
//! Runtime handles never share state, but native objects can be reachable
//! from several handles running on different threads. [`SpinMutex`] guards
//! such objects for short critical sections; the bridge itself never takes
//! it.

use std::hint;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use parking_lot::lock_api::{self, GuardSend, RawMutex};

/// Spins before yielding the thread while waiting
const SPINS_BEFORE_YIELD: u32 = 64;

/// Test-and-set spin lock
pub struct RawSpinLock {
    locked: AtomicBool,
}

unsafe impl RawMutex for RawSpinLock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = RawSpinLock {
        locked: AtomicBool::new(false),
    };

    type GuardMarker = GuardSend;

    fn lock(&self) {
        let mut spins = 0;
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            // Wait on a plain load so contended cores don't bounce the line.
            while self.locked.load(Ordering::Relaxed) {
                if spins < SPINS_BEFORE_YIELD {
                    spins += 1;
                    hint::spin_loop();
                } else {
                    thread::yield_now();
                }
            }
        }
    }

    fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    unsafe fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

/// Mutex for native data shared between runtime threads
pub type SpinMutex<T> = lock_api::Mutex<RawSpinLock, T>;

/// RAII guard of a [`SpinMutex`]
pub type SpinMutexGuard<'a, T> = lock_api::MutexGuard<'a, RawSpinLock, T>;
