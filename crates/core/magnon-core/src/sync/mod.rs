//! Synchronization primitives.
//!
//! Provides [`SpinLock`] for short uncontended critical sections and an
//! async-aware [`Mutex`] that parks waiting tasks on a [`WaitQueue`] instead
//! of burning cycles. Both are const-constructable for use in `static` items.

mod mutex;
mod spinlock;
pub mod waitqueue;

#[cfg(test)]
pub(crate) mod test_waker;

pub use mutex::{Mutex, MutexGuard, MutexLockFuture};
pub use spinlock::{SpinLock, SpinLockGuard};
pub use waitqueue::WaitQueue;
