use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Wake-up channel shared by a whole token tree.
#[derive(Default)]
struct Notifier {
    lock: Mutex<()>,
    cv: Condvar,
}

/// Each state may have a parent, so that cancelling a parent cancels all
/// of its descendants.
struct CancelState {
    cancelled: AtomicBool,
    parent: Option<Arc<CancelState>>,
    notifier: Arc<Notifier>,
}

impl CancelState {
    #[inline]
    fn new_root() -> Arc<Self> {
        Arc::new(Self {
            cancelled: AtomicBool::new(false),
            parent: None,
            notifier: Arc::new(Notifier::default()),
        })
    }

    #[inline]
    fn child_of(parent: Arc<CancelState>) -> Arc<Self> {
        let notifier = parent.notifier.clone();
        Arc::new(Self {
            cancelled: AtomicBool::new(false),
            parent: Some(parent),
            notifier,
        })
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        // taking the lock orders the store before any waiter's re-check
        let _g = self.notifier.lock.lock();
        self.notifier.cv.notify_all();
    }

    #[inline]
    fn is_cancelled(&self) -> bool {
        if self.cancelled.load(Ordering::Acquire) {
            return true;
        }
        match self.parent {
            Some(ref p) => p.is_cancelled(),
            None => false,
        }
    }
}

/// Hierarchical cancellation token.
///
/// Cheap to clone. Cancelling a token cancels all of its children, and
/// wakes every thread blocked in [`sleep_cancellable`](Self::sleep_cancellable)
/// anywhere in the same tree.
#[derive(Clone)]
pub struct CancelToken {
    state: Arc<CancelState>,
}

impl Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("is_cancelled", &self.is_cancelled())
            .finish()
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new_root()
    }
}

impl CancelToken {
    #[inline]
    pub fn new_root() -> Self {
        Self {
            state: CancelState::new_root(),
        }
    }

    #[inline]
    pub fn cancel(&self) {
        self.state.cancel();
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }

    #[inline]
    pub fn new_child(&self) -> Self {
        Self {
            state: CancelState::child_of(self.state.clone()),
        }
    }

    /// Sleep until the token is cancelled or `total` has elapsed.
    /// Returns false if the token was cancelled, true otherwise.
    pub fn sleep_cancellable(&self, total: Duration) -> bool {
        let deadline = Instant::now() + total;
        let notifier = &self.state.notifier;
        let mut guard = notifier.lock.lock();
        loop {
            if self.is_cancelled() {
                return false;
            }
            if notifier.cv.wait_until(&mut guard, deadline).timed_out() {
                return !self.is_cancelled();
            }
        }
    }
}
