//! Minimal task utilities for cooperative scheduling.
//!
//! [`block_on`] drives a future to completion by polling in a loop; it is
//! enough to run the storage stack's futures from synchronous code and from
//! host tests, where all I/O completes without external wakeups.
//! [`yield_now`] is the cooperative "give another task a turn" point.

use core::future::Future;
use core::pin::{Pin, pin};
use core::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

/// Runs a future to completion by polling it in a loop.
///
/// Pending polls spin-hint and retry, so futures that self-wake (such as
/// [`yield_now`]) make progress without an executor. Futures that require an
/// external wakeup will spin until that wakeup arrives from another thread.
pub fn block_on<F: Future>(f: F) -> F::Output {
    fn noop(_: *const ()) {}
    fn clone(p: *const ()) -> RawWaker {
        RawWaker::new(p, &VTABLE)
    }
    static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, noop, noop, noop);

    // SAFETY: The vtable functions never dereference the data pointer.
    let waker = unsafe { Waker::from_raw(RawWaker::new(core::ptr::null(), &VTABLE)) };
    let mut cx = Context::from_waker(&waker);
    let mut fut = pin!(f);

    loop {
        match fut.as_mut().poll(&mut cx) {
            Poll::Ready(val) => return val,
            Poll::Pending => core::hint::spin_loop(),
        }
    }
}

/// Returns a future that suspends the current task exactly once.
///
/// The first poll wakes the task's own waker and returns `Pending`, giving
/// other ready tasks a chance to run; the second poll completes.
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

/// Future returned by [`yield_now`].
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}
