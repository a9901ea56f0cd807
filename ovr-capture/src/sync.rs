//! Waiting primitives shared by the label registry and the per-thread streams.
//!
//! Everything here waits the same way: spin for a few rounds, then yield the time slice,
//! then park on a condition variable with a short timeout.

use std::cell::UnsafeCell;
use std::hint;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

/// Upper bound of a single park. Waiters re-check their condition after it, so a lost
/// notification costs at most this much latency.
const PARK_TIMEOUT: Duration = Duration::from_millis(1);

pub struct Backoff {
    step: u32,
    spin_limit: u32,
    yield_limit: u32,
}

impl Backoff {
    pub const fn new(spin_limit: u32, yield_limit: u32) -> Self {
        Self {
            step: 0,
            spin_limit,
            yield_limit,
        }
    }

    /// Spins or yields once. Returns `false` when both budgets are used up and the caller
    /// should park instead.
    pub fn snooze(&mut self) -> bool {
        if self.step < self.spin_limit {
            for _ in 0..(1u32 << self.step.min(6)) {
                hint::spin_loop();
            }
        } else if self.step < self.spin_limit + self.yield_limit {
            thread::yield_now();
        } else {
            return false;
        }
        self.step += 1;
        true
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(10, 50)
    }
}

fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mutual exclusion for short critical sections.
pub struct SpinLock<T> {
    locked: AtomicBool,
    parked: AtomicUsize,
    park_lock: Mutex<()>,
    unlocked: Condvar,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            parked: AtomicUsize::new(0),
            park_lock: Mutex::new(()),
            unlocked: Condvar::new(),
            data: UnsafeCell::new(value),
        }
    }

    #[inline]
    fn try_acquire(&self) -> bool {
        self.locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        self.try_acquire().then(|| SpinLockGuard { lock: self })
    }

    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        if self.try_acquire() {
            return SpinLockGuard { lock: self };
        }

        let mut backoff = Backoff::default();
        loop {
            if self.try_acquire() {
                return SpinLockGuard { lock: self };
            }
            if !backoff.snooze() {
                self.parked.fetch_add(1, Ordering::SeqCst);
                let guard = lock_ignore_poison(&self.park_lock);
                if self.locked.load(Ordering::SeqCst) {
                    let _ = self.unlocked.wait_timeout(guard, PARK_TIMEOUT);
                }
                self.parked.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    fn unlock(&self) {
        self.locked.store(false, Ordering::SeqCst);
        if self.parked.load(Ordering::SeqCst) > 0 {
            let _guard = lock_ignore_poison(&self.park_lock);
            self.unlocked.notify_one();
        }
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: the guard exists only while `locked` is held
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard exists only while `locked` is held
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

/// Two-state gate: open means the stream has room (or was just flushed), closed means a
/// writer is waiting for the next buffer swap.
pub struct Gate {
    open: AtomicBool,
    lock: Mutex<()>,
    opened: Condvar,
}

impl Gate {
    pub const fn new() -> Self {
        Self {
            open: AtomicBool::new(true),
            lock: Mutex::new(()),
            opened: Condvar::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
        let _guard = lock_ignore_poison(&self.lock);
        self.opened.notify_all();
    }

    /// Blocks until the gate opens. Returns `false` without waiting further as soon as
    /// `abort` reports true.
    pub fn wait(&self, mut backoff: Backoff, abort: impl Fn() -> bool) -> bool {
        loop {
            if self.is_open() {
                return true;
            }
            if abort() {
                return false;
            }
            if !backoff.snooze() {
                let guard = lock_ignore_poison(&self.lock);
                if !self.is_open() {
                    let _ = self.opened.wait_timeout(guard, PARK_TIMEOUT);
                }
            }
        }
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn spin_lock_counts_under_contention() {
        let counter = Arc::new(SpinLock::new(0u64));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let counter = counter.clone();
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        *counter.lock() += 1;
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(*counter.lock(), 80_000);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let lock = SpinLock::new(());
        let guard = lock.lock();
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn backoff_exhausts() {
        let mut backoff = Backoff::new(2, 3);
        let rounds = std::iter::from_fn(|| backoff.snooze().then_some(())).count();
        assert_eq!(rounds, 5);
    }

    #[test]
    fn gate_wakes_waiter() {
        let gate = Arc::new(Gate::new());
        gate.close();
        let waiter = {
            let gate = gate.clone();
            thread::spawn(move || gate.wait(Backoff::default(), || false))
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());
        gate.open();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn gate_wait_aborts() {
        let gate = Gate::new();
        gate.close();
        let start = Instant::now();
        let deadline = start + Duration::from_millis(20);
        assert!(!gate.wait(Backoff::default(), || Instant::now() > deadline));
    }
}
