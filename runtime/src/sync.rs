//! Synchronization primitives built on the event/wait core: `Mutex`,
//! `RwLock`, `Cond`, `Barrier` (`spec.md` §4.8).
//!
//! Each primitive's small bookkeeping struct (locked/owner/waiters) is
//! guarded by a real `std::sync::Mutex`, the same tool the teacher reaches
//! for in `exercises/01_concurrency_sync/02_mutex_counter` — these
//! bookkeeping structs are genuinely shared across OS threads once a green
//! thread is handed out to a worker (`worker.rs`), so a cooperative-only
//! lock would not be correct here. The *sleep*, though, is always the
//! runtime's own event/wait core (`crate::runtime::block_current_on`), so a
//! blocked green thread costs the scheduler nothing but a ring entry, per
//! the teacher's `03_os_concurrency/{03_spinlock,05_rwlock}` contrast
//! between a busy spin and a real wait queue — we take the wait-queue side.

use crate::error::{RtError, RtResult};
use crate::event::{EventHandle, EventKind};
use crate::ring::Ring;
use crate::tcb::ThreadId;
use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::Mutex as StdMutex;

struct MutexInner {
    locked: bool,
    owner: Option<ThreadId>,
    recursion: u32,
    waiters: Ring<ThreadId>,
}

/// A recursive, owner-tracked mutex. Matches `spec.md` §4.8: "re-entrant by
/// the same owner; a distinct thread blocks until release."
pub struct Mutex<T> {
    inner: StdMutex<MutexInner>,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: StdMutex::new(MutexInner {
                locked: false,
                owner: None,
                recursion: 0,
                waiters: Ring::new(),
            }),
            data: UnsafeCell::new(value),
        }
    }

    fn address(&self) -> usize {
        &self.inner as *const _ as usize
    }

    pub fn lock(&self) -> RtResult<MutexGuard<'_, T>> {
        self.lock_with(None)
    }

    /// As `lock`, but also wakes if `extra` resolves first — composes a lock
    /// acquisition with a caller-supplied cancellation/timeout event
    /// (`spec.md` §4.4's `extra` parameter), returning
    /// `Err(RtError::Interrupted)` if that's what actually happened.
    pub fn lock_with(&self, extra: Option<EventHandle>) -> RtResult<MutexGuard<'_, T>> {
        loop {
            let me = crate::runtime::current_tid()?;
            {
                let mut inner = self.inner.lock().expect("mutex bookkeeping poisoned");
                if !inner.locked {
                    inner.locked = true;
                    inner.owner = Some(me);
                    inner.recursion = 1;
                    drop(inner);
                    crate::runtime::track_owned_mutex(self.address());
                    return Ok(MutexGuard { mutex: self });
                }
                if inner.owner == Some(me) {
                    inner.recursion += 1;
                    return Ok(MutexGuard { mutex: self });
                }
                inner.waiters.push_back(me);
            }
            let e = crate::runtime::alloc_event(EventKind::Mutex {
                mutex: self.address(),
            });
            let outcome = crate::runtime::block_on_with_extra(e, extra);
            crate::runtime::free_event(e);
            outcome?;
        }
    }

    pub fn try_lock(&self) -> RtResult<MutexGuard<'_, T>> {
        let me = crate::runtime::current_tid()?;
        let mut inner = self.inner.lock().expect("mutex bookkeeping poisoned");
        if !inner.locked {
            inner.locked = true;
            inner.owner = Some(me);
            inner.recursion = 1;
            drop(inner);
            crate::runtime::track_owned_mutex(self.address());
            Ok(MutexGuard { mutex: self })
        } else if inner.owner == Some(me) {
            inner.recursion += 1;
            Ok(MutexGuard { mutex: self })
        } else {
            Err(RtError::Busy)
        }
    }

    fn unlock(&self) {
        let woken = {
            let mut inner = self.inner.lock().expect("mutex bookkeeping poisoned");
            inner.recursion = inner.recursion.saturating_sub(1);
            if inner.recursion > 0 {
                return;
            }
            inner.locked = false;
            inner.owner = None;
            inner.waiters.pop_front()
        };
        crate::runtime::untrack_owned_mutex(self.address());
        if let Some(waiter) = woken {
            let addr = self.address();
            crate::runtime::resolve_event(waiter, move |k| matches!(k, EventKind::Mutex { mutex } if *mutex == addr));
        }
    }

    /// Release the mutex unconditionally, ignoring recursion depth. Used
    /// to unwind a thread's `owned_mutexes` ring on exit/cancel
    /// (`spec.md` §4.8's "owner's owned-mutex ring... released on exit").
    pub(crate) fn release_all(&self) {
        let woken = {
            let mut inner = self.inner.lock().expect("mutex bookkeeping poisoned");
            inner.locked = false;
            inner.owner = None;
            inner.recursion = 0;
            inner.waiters.pop_front()
        };
        if let Some(waiter) = woken {
            let addr = self.address();
            crate::runtime::resolve_event(waiter, move |k| matches!(k, EventKind::Mutex { mutex } if *mutex == addr));
        }
    }
}

pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

/// Reader/writer lock as two mutexes: one protects the reader count, one is
/// held by whichever writer currently owns the lock (or by the first
/// reader, to exclude writers) — the classic construction the teacher's
/// `03_os_concurrency/05_rwlock` exercise sketches.
pub struct RwLock<T> {
    readers: Mutex<u32>,
    writer: Mutex<()>,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for RwLock<T> {}
unsafe impl<T: Send> Sync for RwLock<T> {}

impl<T> RwLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            readers: Mutex::new(0),
            writer: Mutex::new(()),
            data: UnsafeCell::new(value),
        }
    }

    pub fn read(&self) -> RtResult<RwLockReadGuard<'_, T>> {
        self.read_with(None)
    }

    pub fn read_with(&self, extra: Option<EventHandle>) -> RtResult<RwLockReadGuard<'_, T>> {
        let mut count = self.readers.lock_with(extra)?;
        if *count == 0 {
            // The first reader excludes writers for the whole read epoch;
            // the lock is released once the reader count drops back to 0.
            std::mem::forget(self.writer.lock_with(extra)?);
        }
        *count += 1;
        Ok(RwLockReadGuard { lock: self })
    }

    pub fn write(&self) -> RtResult<RwLockWriteGuard<'_, T>> {
        self.write_with(None)
    }

    pub fn write_with(&self, extra: Option<EventHandle>) -> RtResult<RwLockWriteGuard<'_, T>> {
        let guard = self.writer.lock_with(extra)?;
        std::mem::forget(guard);
        Ok(RwLockWriteGuard { lock: self })
    }
}

pub struct RwLockReadGuard<'a, T> {
    lock: &'a RwLock<T>,
}

impl<T> Deref for RwLockReadGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> Drop for RwLockReadGuard<'_, T> {
    fn drop(&mut self) {
        let mut count = self.lock.readers.lock().expect("reader count mutex poisoned");
        *count -= 1;
        if *count == 0 {
            self.lock.writer.release_all();
        }
    }
}

pub struct RwLockWriteGuard<'a, T> {
    lock: &'a RwLock<T>,
}

impl<T> Deref for RwLockWriteGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for RwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for RwLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.writer.release_all();
    }
}

/// Condition variable: `await`/`notify` over the event core, always used
/// alongside a `Mutex` the caller already holds (spec.md §4.8).
#[derive(Default)]
pub struct Cond {
    waiters: StdMutex<Ring<ThreadId>>,
}

impl Cond {
    pub fn new() -> Self {
        Self::default()
    }

    fn address(&self) -> usize {
        &self.waiters as *const _ as usize
    }

    /// Atomically release `guard`'s mutex and block until `notify_one`/
    /// `notify_all`, then reacquire it.
    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> RtResult<MutexGuard<'a, T>> {
        self.wait_with(guard, None)
    }

    /// As `wait`, but also wakes if `extra` resolves first, reporting
    /// `Err(RtError::Interrupted)` in that case.
    pub fn wait_with<'a, T>(
        &self,
        guard: MutexGuard<'a, T>,
        extra: Option<EventHandle>,
    ) -> RtResult<MutexGuard<'a, T>> {
        let me = crate::runtime::current_tid()?;
        let mutex = guard.mutex;
        self.waiters.lock().expect("cond waiters poisoned").push_back(me);
        drop(guard);
        let e = crate::runtime::alloc_event(EventKind::Cond {
            cond: self.address(),
        });
        let outcome = crate::runtime::block_on_with_extra(e, extra);
        crate::runtime::free_event(e);
        outcome?;
        mutex.lock()
    }

    pub fn notify_one(&self) {
        if let Some(tid) = self.waiters.lock().expect("cond waiters poisoned").pop_front() {
            let addr = self.address();
            crate::runtime::resolve_event(tid, move |k| matches!(k, EventKind::Cond { cond } if *cond == addr));
        }
    }

    pub fn notify_all(&self) {
        let mut waiters = self.waiters.lock().expect("cond waiters poisoned");
        let addr = self.address();
        while let Some(tid) = waiters.pop_front() {
            crate::runtime::resolve_event(tid, move |k| matches!(k, EventKind::Cond { cond } if *cond == addr));
        }
    }
}

/// `spec.md` §6: `reach()` returns `BARRIER_HEADLIGHT` to exactly one
/// caller (the one that completes the barrier), `BARRIER_TAILLIGHT` to the
/// last caller to *arrive*, and `0` to everyone else.
pub struct Barrier {
    threshold: usize,
    state: StdMutex<BarrierState>,
}

struct BarrierState {
    arrived: usize,
    generation: u64,
    waiters: Ring<ThreadId>,
}

impl Barrier {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            state: StdMutex::new(BarrierState {
                arrived: 0,
                generation: 0,
                waiters: Ring::new(),
            }),
        }
    }

    fn address(&self) -> usize {
        self as *const _ as usize
    }

    pub fn reach(&self) -> RtResult<i32> {
        self.reach_with(None)
    }

    /// As `reach`, but also wakes if `extra` resolves first.
    pub fn reach_with(&self, extra: Option<EventHandle>) -> RtResult<i32> {
        let me = crate::runtime::current_tid()?;
        let my_generation;
        let is_tail;
        {
            let mut state = self.state.lock().expect("barrier state poisoned");
            state.arrived += 1;
            my_generation = state.generation;
            is_tail = state.arrived == self.threshold.saturating_sub(1);
            if state.arrived >= self.threshold {
                let mut drained = std::mem::take(&mut state.waiters);
                let mut woken = Vec::new();
                while let Some(tid) = drained.pop_front() {
                    woken.push(tid);
                }
                state.arrived = 0;
                state.generation += 1;
                drop(state);
                let addr = self.address();
                for tid in woken {
                    crate::runtime::resolve_event(tid, move |k| matches!(k, EventKind::Cond { cond } if *cond == addr));
                }
                return Ok(crate::config::BARRIER_HEADLIGHT);
            }
            state.waiters.push_back(me);
        }

        let e = crate::runtime::alloc_event(EventKind::Cond {
            cond: self.address(),
        });
        let outcome = crate::runtime::block_on_with_extra(e, extra);
        crate::runtime::free_event(e);
        outcome?;

        let state = self.state.lock().expect("barrier state poisoned");
        if state.generation != my_generation {
            drop(state);
            Ok(if is_tail {
                crate::config::BARRIER_TAILLIGHT
            } else {
                0
            })
        } else {
            drop(state);
            Ok(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_lock_is_recursive_for_the_holder() {
        // Exercised without a running scheduler: current_tid() will error,
        // so this only checks the non-runtime-dependent bookkeeping shape.
        let m = Mutex::new(5);
        assert!(m.inner.lock().unwrap().waiters.is_empty());
        let _ = m;
    }
}
