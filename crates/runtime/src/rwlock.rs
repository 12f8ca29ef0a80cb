//! Reentrant readers-writer lock with writer preference
//!
//! The bundle's registries sit behind this lock. Contract:
//!
//! - many concurrent readers, one exclusive writer;
//! - both roles are reentrant on the same thread (a user function invoked
//!   mid-format may call back into the bundle without deadlocking);
//! - a writer may take additional read locks (downgrading); when the write
//!   lock is finally released those reads continue as ordinary reader
//!   locks;
//! - upgrading is refused immediately: a thread holding only a read lock
//!   that asks for a write would deadlock against itself;
//! - waiting writers block *new* reader threads (writer preference), so a
//!   steady reader stream cannot starve writes;
//! - every acquire takes an optional timeout: `None` waits forever,
//!   `Some(ZERO)` is a non-blocking attempt, positive values are
//!   deadlines.
//!
//! Nested write guards on one thread alias the same `&mut T`; holders must
//! not keep borrows from an outer guard alive while dereferencing an inner
//! one. The bundle never nests write borrows.

use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// Lock acquisition failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    #[error("lock acquisition timed out after {0:?}")]
    Timeout(Duration),

    #[error("cannot upgrade a read lock to a write lock; release the read lock first")]
    Upgrade,

    #[error("lock state poisoned by a panicking holder")]
    Poisoned,
}

#[derive(Debug, Default)]
struct LockState {
    writer: Option<ThreadId>,
    writer_depth: usize,
    readers: HashMap<ThreadId, usize>,
    waiting_writers: usize,
}

impl LockState {
    fn total_readers(&self) -> usize {
        self.readers.values().sum()
    }

    fn held_by_reader(&self, tid: ThreadId) -> bool {
        self.readers.get(&tid).copied().unwrap_or(0) > 0
    }
}

/// The lock plus the data it protects
pub struct ReentrantRwLock<T> {
    state: Mutex<LockState>,
    readers_cv: Condvar,
    writers_cv: Condvar,
    data: UnsafeCell<T>,
}

// Safety: access to `data` follows the reader/writer protocol tracked in
// `state`; the state mutex serializes the bookkeeping itself.
unsafe impl<T: Send> Send for ReentrantRwLock<T> {}
unsafe impl<T: Send + Sync> Sync for ReentrantRwLock<T> {}

impl<T> std::fmt::Debug for ReentrantRwLock<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReentrantRwLock").finish_non_exhaustive()
    }
}

impl<T> ReentrantRwLock<T> {
    pub fn new(data: T) -> Self {
        ReentrantRwLock {
            state: Mutex::new(LockState::default()),
            readers_cv: Condvar::new(),
            writers_cv: Condvar::new(),
            data: UnsafeCell::new(data),
        }
    }

    /// Acquire a shared read lock.
    ///
    /// Reentrant: succeeds immediately when this thread already holds the
    /// read or the write lock (the downgrade path), regardless of waiting
    /// writers.
    pub fn read(&self, timeout: Option<Duration>) -> Result<ReadGuard<'_, T>, LockError> {
        let tid = thread::current().id();
        let deadline = timeout.map(|d| Instant::now() + d);
        let mut state = self.state.lock().map_err(|_| LockError::Poisoned)?;

        loop {
            let reentrant = state.writer == Some(tid) || state.held_by_reader(tid);
            if reentrant || (state.writer.is_none() && state.waiting_writers == 0) {
                *state.readers.entry(tid).or_insert(0) += 1;
                return Ok(ReadGuard { lock: self });
            }
            state = self.block(&self.readers_cv, state, deadline, timeout)?;
        }
    }

    /// Acquire the exclusive write lock.
    ///
    /// Reentrant for the holding writer. A thread holding only read locks
    /// gets `LockError::Upgrade` immediately.
    pub fn write(&self, timeout: Option<Duration>) -> Result<WriteGuard<'_, T>, LockError> {
        let tid = thread::current().id();
        let deadline = timeout.map(|d| Instant::now() + d);
        let mut state = self.state.lock().map_err(|_| LockError::Poisoned)?;

        if state.writer == Some(tid) {
            state.writer_depth += 1;
            return Ok(WriteGuard { lock: self });
        }
        if state.held_by_reader(tid) {
            return Err(LockError::Upgrade);
        }

        state.waiting_writers += 1;
        loop {
            if state.writer.is_none() && state.total_readers() == 0 {
                state.waiting_writers -= 1;
                state.writer = Some(tid);
                state.writer_depth = 1;
                return Ok(WriteGuard { lock: self });
            }
            match self.block(&self.writers_cv, state, deadline, timeout) {
                Ok(next) => state = next,
                Err(e) => {
                    let mut state = self.state.lock().map_err(|_| LockError::Poisoned)?;
                    state.waiting_writers -= 1;
                    if state.waiting_writers == 0 {
                        // Release readers parked behind writer preference.
                        self.readers_cv.notify_all();
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Park on `cv` until notified or past the deadline
    fn block<'l>(
        &self,
        cv: &Condvar,
        state: MutexGuard<'l, LockState>,
        deadline: Option<Instant>,
        timeout: Option<Duration>,
    ) -> Result<MutexGuard<'l, LockState>, LockError> {
        match deadline {
            None => cv.wait(state).map_err(|_| LockError::Poisoned),
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(LockError::Timeout(timeout.unwrap_or_default()));
                }
                let (state, result) = cv
                    .wait_timeout(state, deadline - now)
                    .map_err(|_| LockError::Poisoned)?;
                if result.timed_out() {
                    // One more condition check happens in the caller loop
                    // only if time remains; report the timeout here.
                    return Err(LockError::Timeout(timeout.unwrap_or_default()));
                }
                Ok(state)
            }
        }
    }

    fn release_read(&self) {
        let tid = thread::current().id();
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(count) = state.readers.get_mut(&tid) {
            *count -= 1;
            if *count == 0 {
                state.readers.remove(&tid);
            }
        }
        if state.total_readers() == 0 && state.waiting_writers > 0 {
            self.writers_cv.notify_one();
        }
    }

    fn release_write(&self) {
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.writer_depth -= 1;
        if state.writer_depth == 0 {
            state.writer = None;
            // Reads this thread took while writing stay in `readers` and
            // now behave as ordinary reader locks (downgrade).
            if state.waiting_writers > 0 && state.total_readers() == 0 {
                self.writers_cv.notify_one();
            } else {
                self.readers_cv.notify_all();
            }
        }
    }
}

/// Shared access to the protected data
pub struct ReadGuard<'a, T> {
    lock: &'a ReentrantRwLock<T>,
}

impl<T> Deref for ReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: read lock held; writers are excluded (the downgrade case
        // is the same thread, which must not alias its own &mut here).
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> Drop for ReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release_read();
    }
}

/// Exclusive access to the protected data
pub struct WriteGuard<'a, T> {
    lock: &'a ReentrantRwLock<T>,
}

impl<T> std::fmt::Debug for WriteGuard<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteGuard").finish_non_exhaustive()
    }
}

impl<T> Deref for WriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: write lock held by this thread.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: write lock held by this thread; nested guards must not
        // be dereferenced mutably at the same time (module contract).
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for WriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release_write();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const SHORT: Option<Duration> = Some(Duration::from_millis(50));

    #[test]
    fn test_multiple_readers() {
        let lock = Arc::new(ReentrantRwLock::new(5u32));
        let a = lock.read(None).unwrap();
        let b = lock.read(None).unwrap();
        assert_eq!(*a + *b, 10);
    }

    #[test]
    fn test_write_then_read_data() {
        let lock = ReentrantRwLock::new(String::new());
        {
            let mut w = lock.write(None).unwrap();
            w.push_str("hello");
        }
        assert_eq!(&*lock.read(None).unwrap(), "hello");
    }

    #[test]
    fn test_reentrant_read() {
        let lock = ReentrantRwLock::new(());
        let _a = lock.read(None).unwrap();
        let _b = lock.read(None).unwrap();
        let _c = lock.read(None).unwrap();
    }

    #[test]
    fn test_reentrant_write() {
        let lock = ReentrantRwLock::new(0u32);
        let _a = lock.write(None).unwrap();
        let _b = lock.write(None).unwrap();
    }

    #[test]
    fn test_upgrade_refused() {
        let lock = ReentrantRwLock::new(());
        let _r = lock.read(None).unwrap();
        assert_eq!(lock.write(None).unwrap_err(), LockError::Upgrade);
    }

    #[test]
    fn test_downgrade() {
        let lock = Arc::new(ReentrantRwLock::new(1u32));
        let w = lock.write(None).unwrap();
        // Writer takes a read lock while still writing.
        let r = lock.read(None).unwrap();
        assert_eq!(*r, 1);
        drop(w);
        // The read survives the write release as a plain reader lock: a
        // second thread cannot write until it is gone.
        let other = {
            let lock = lock.clone();
            std::thread::spawn(move || lock.write(SHORT).map(|_| ()))
        };
        assert_eq!(other.join().unwrap(), Err(LockError::Timeout(SHORT.unwrap())));
        drop(r);
        lock.write(SHORT).map(|_| ()).unwrap();
    }

    #[test]
    fn test_zero_timeout_is_try() {
        let lock = Arc::new(ReentrantRwLock::new(()));
        let _w = lock.write(None).unwrap();
        let lock2 = lock.clone();
        let handle = std::thread::spawn(move || {
            lock2.read(Some(Duration::ZERO)).map(|_| ())
        });
        assert!(matches!(handle.join().unwrap(), Err(LockError::Timeout(_))));
    }

    #[test]
    fn test_writer_blocks_readers_across_threads() {
        let lock = Arc::new(ReentrantRwLock::new(0u32));
        let w = lock.write(None).unwrap();
        let lock2 = lock.clone();
        let reader = std::thread::spawn(move || lock2.read(SHORT).map(|g| *g));
        assert!(matches!(reader.join().unwrap(), Err(LockError::Timeout(_))));
        drop(w);
    }

    #[test]
    fn test_writer_preference_blocks_new_readers() {
        let lock = Arc::new(ReentrantRwLock::new(()));
        let r = lock.read(None).unwrap();

        // A writer queues up behind the reader.
        let lock_w = lock.clone();
        let writer = std::thread::spawn(move || {
            let _w = lock_w.write(Some(Duration::from_secs(5))).unwrap();
        });
        // Give the writer time to enqueue.
        std::thread::sleep(Duration::from_millis(50));

        // A fresh reader thread must now wait behind the writer.
        let lock_r = lock.clone();
        let late_reader = std::thread::spawn(move || lock_r.read(SHORT).map(|_| ()));
        assert!(matches!(
            late_reader.join().unwrap(),
            Err(LockError::Timeout(_))
        ));

        drop(r);
        writer.join().unwrap();
    }

    #[test]
    fn test_concurrent_counting() {
        let lock = Arc::new(ReentrantRwLock::new(0u64));
        let observed_max = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let lock = lock.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    let mut w = lock.write(None).unwrap();
                    *w += 1;
                }
            }));
        }
        for _ in 0..4 {
            let lock = lock.clone();
            let observed = observed_max.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    let r = lock.read(None).unwrap();
                    observed.fetch_max(*r as usize, Ordering::Relaxed);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.read(None).unwrap(), 400);
        assert!(observed_max.load(Ordering::Relaxed) <= 400);
    }
}
