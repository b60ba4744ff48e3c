//! Mutual exclusion for shared volume state.
//!
//! [`Mutex`] serializes cooperative tasks around state that must only ever
//! have one owner, such as a volume's cursor and scratch sector buffer.
//! Contended lockers park their waker on a [`WaitQueue`] and are woken one
//! at a time as the guard drops; [`try_lock`](Mutex::try_lock) supports the
//! bounded-wait acquire the storage wrapper builds on top.

use core::cell::UnsafeCell;
use core::future::Future;
use core::ops::{Deref, DerefMut};
use core::pin::Pin;
use core::sync::atomic::{AtomicBool, Ordering};
use core::task::{Context, Poll};

use crate::sync::WaitQueue;

/// An async-aware mutual exclusion lock.
///
/// Holding the [`MutexGuard`] marks the single owner of the protected
/// value; everyone else either parks until woken
/// ([`lock`](Mutex::lock)) or backs off immediately
/// ([`try_lock`](Mutex::try_lock)). Const-constructable for `static` items.
///
/// # Example
///
/// ```ignore
/// struct Journal { appended: u64 }
///
/// async fn append(journal: &Mutex<Journal>) {
///     let mut journal = journal.lock().await;
///     journal.appended += 1;
/// }
/// ```
pub struct Mutex<T> {
    locked: AtomicBool,
    waiters: WaitQueue,
    data: UnsafeCell<T>,
}

// SAFETY: at most one guard exists at a time, so moving or sharing the
// mutex across threads only requires the protected value to be `Send`.
unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// Creates an unlocked mutex around `value`.
    pub const fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            waiters: WaitQueue::new(),
            data: UnsafeCell::new(value),
        }
    }

    /// Attempts to take the lock without waiting.
    ///
    /// Returns `None` if another task holds it. This is the primitive the
    /// storage wrapper retries between cooperative yields to implement its
    /// bounded wait.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(MutexGuard { mutex: self })
        } else {
            None
        }
    }

    /// Takes the lock, parking the task while it is contended.
    ///
    /// The returned future resolves to the guard; while another task holds
    /// the lock, this one sleeps on the wait queue and is woken by the
    /// guard's release.
    pub fn lock(&self) -> MutexLockFuture<'_, T> {
        MutexLockFuture { mutex: self }
    }

    /// Takes the lock by spinning, for contexts that cannot await.
    ///
    /// Meant for setup paths before the executor runs; in task context
    /// prefer [`lock`](Mutex::lock), which does not burn cycles.
    pub fn lock_sync(&self) -> MutexGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            core::hint::spin_loop();
        }
    }

    /// Consumes the mutex and returns the protected value.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

/// Future returned by [`Mutex::lock`].
pub struct MutexLockFuture<'a, T> {
    mutex: &'a Mutex<T>,
}

impl<'a, T> Future for MutexLockFuture<'a, T> {
    type Output = MutexGuard<'a, T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mutex = self.mutex;

        if let Some(guard) = mutex.try_lock() {
            return Poll::Ready(guard);
        }

        // Park before retrying: a release that lands between the attempt
        // above and the registration would otherwise be missed.
        let parked = mutex.waiters.register_waker(cx.waker());
        if let Some(guard) = mutex.try_lock() {
            return Poll::Ready(guard);
        }

        // Queue full; degrade to re-polling instead of sleeping forever.
        if !parked {
            cx.waker().wake_by_ref();
        }
        Poll::Pending
    }
}

/// RAII guard; releasing it wakes the next parked waiter.
pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: a live guard is the lock's only owner.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: a live guard is the lock's only owner.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.locked.store(false, Ordering::Release);
        self.mutex.waiters.wake_one();
    }
}
