//! Wakers for driving storage futures in host tests.
//!
//! Built on [`std::task::Wake`] so tests can poll lock and volume futures
//! by hand: [`noop_waker`] for futures whose progress the test loop itself
//! drives, [`counting_waker`] to observe that a release actually woke a
//! parked task.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Wake, Waker};

/// Creates a [`Waker`] that ignores wakeups.
pub fn noop_waker() -> Waker {
    struct Noop;

    impl Wake for Noop {
        fn wake(self: Arc<Self>) {}
        fn wake_by_ref(self: &Arc<Self>) {}
    }

    Waker::from(Arc::new(Noop))
}

/// Creates a [`Waker`] that counts how often it fires.
///
/// Returns the waker together with the counter it increments.
pub fn counting_waker() -> (Waker, Arc<AtomicUsize>) {
    struct Counting(Arc<AtomicUsize>);

    impl Wake for Counting {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn wake_by_ref(self: &Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let count = Arc::new(AtomicUsize::new(0));
    let waker = Waker::from(Arc::new(Counting(Arc::clone(&count))));
    (waker, count)
}
