//! Wait queue for task wakeups.
//!
//! [`WaitQueue`] stores [`Waker`]s from async tasks that are waiting for an
//! event, typically a lock becoming free. Uses a fixed-capacity [`ArrayVec`]
//! so the queue itself never allocates.

use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll, Waker};

use planck_noalloc::vec::ArrayVec;

use crate::sync::SpinLock;

/// Maximum number of waiters per queue.
const MAX_WAITERS: usize = 32;

/// A queue of [`Waker`]s waiting for an event.
///
/// Tasks call [`wait`](WaitQueue::wait) to obtain a future that completes
/// when the queue is woken. The event source calls
/// [`wake_one`](WaitQueue::wake_one) or [`wake_all`](WaitQueue::wake_all) to
/// resume waiting tasks.
pub struct WaitQueue {
    waiters: SpinLock<ArrayVec<Waker, MAX_WAITERS>>,
}

impl WaitQueue {
    /// Creates an empty wait queue.
    pub const fn new() -> Self {
        Self {
            waiters: SpinLock::new(ArrayVec::new()),
        }
    }

    /// Returns a future that completes when this queue is woken.
    pub fn wait(&self) -> WaitFuture<'_> {
        WaitFuture {
            queue: self,
            registered: false,
        }
    }

    /// Registers a waker without creating a future.
    ///
    /// Used by [`Mutex`](crate::sync::Mutex) to register interest before
    /// retrying acquisition. Returns `true` if the waker was registered,
    /// `false` if the queue is full.
    pub fn register_waker(&self, waker: &Waker) -> bool {
        let mut waiters = self.waiters.lock();
        if waiters.len() < MAX_WAITERS {
            waiters.push(waker.clone());
            true
        } else {
            false
        }
    }

    /// Wakes one waiting task (FIFO order).
    pub fn wake_one(&self) {
        let mut waiters = self.waiters.lock();
        if !waiters.is_empty() {
            let waker = waiters.swap_remove(0);
            drop(waiters);
            waker.wake();
        }
    }

    /// Wakes all waiting tasks.
    pub fn wake_all(&self) {
        let mut waiters = self.waiters.lock();
        // Drain all wakers, then wake them outside the lock.
        let mut temp = ArrayVec::<Waker, MAX_WAITERS>::new();
        while let Some(w) = waiters.pop() {
            temp.push(w);
        }
        drop(waiters);
        while let Some(w) = temp.pop() {
            w.wake();
        }
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Future returned by [`WaitQueue::wait`].
pub struct WaitFuture<'a> {
    queue: &'a WaitQueue,
    registered: bool,
}

impl Future for WaitFuture<'_> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.registered {
            // We were woken — complete.
            Poll::Ready(())
        } else {
            self.registered = true;
            let mut waiters = self.queue.waiters.lock();
            if waiters.len() < MAX_WAITERS {
                waiters.push(cx.waker().clone());
            }
            Poll::Pending
        }
    }
}
