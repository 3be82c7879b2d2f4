use crate::error::{RejectReason, RejectedError};
use crate::threading::executor::panic_message;
use crate::utils::CancelToken;
use parking_lot::{Condvar, Mutex};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Default)]
struct Live {
    count: Mutex<usize>,
    cv: Condvar,
}

impl Live {
    fn enter(&self) {
        *self.count.lock() += 1;
    }

    fn leave(&self) {
        let mut n = self.count.lock();
        *n -= 1;
        if *n == 0 {
            self.cv.notify_all();
        }
    }
}

/// Fixed-delay scheduler for periodic tasks such as receiver polling.
///
/// Every scheduled task gets its own thread named `<scheduler>.<seq>`,
/// sleeping on a child of the scheduler's cancel token so shutdown wakes it
/// immediately. A panicking tick is logged and the task keeps its schedule.
pub struct Scheduler {
    name: String,
    cancel: CancelToken,
    shutdown: AtomicBool,
    seq: AtomicUsize,
    live: Arc<Live>,
}

impl Scheduler {
    pub fn new(name: impl Into<String>, parent: &CancelToken) -> Self {
        Self {
            name: name.into(),
            cancel: parent.new_child(),
            shutdown: AtomicBool::new(false),
            seq: AtomicUsize::new(1),
            live: Arc::new(Live::default()),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `task` after `initial_delay`, then again `period` after each run
    /// finishes, until the returned handle is cancelled or dropped or the
    /// scheduler shuts down.
    pub fn schedule<F>(
        &self,
        task: F,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<ScheduledTask, RejectedError>
    where
        F: FnMut() + Send + 'static,
    {
        if self.is_shutdown() {
            return Err(RejectedError::new(self.name.clone(), RejectReason::Shutdown));
        }
        let token = self.cancel.new_child();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let thread_name = format!("{}.{:02}", self.name, seq);

        let live = self.live.clone();
        let t = token.clone();
        let sched_name = self.name.clone();
        let mut task = task;

        live.enter();
        let res = thread::Builder::new().name(thread_name).spawn(move || {
            let mut delay = initial_delay;
            while t.sleep_cancellable(delay) {
                if let Err(panic) = catch_unwind(AssertUnwindSafe(&mut task)) {
                    tracing::error!(
                        "[Scheduler:{}] scheduled task panicked: {}",
                        sched_name,
                        panic_message(&panic)
                    );
                }
                delay = period;
            }
            live.leave();
        });

        if let Err(err) = res {
            self.live.leave();
            tracing::error!("[Scheduler:{}] failed to spawn task thread: {}", self.name, err);
            return Err(RejectedError::new(self.name.clone(), RejectReason::Aborted));
        }
        Ok(ScheduledTask { token })
    }

    /// Cancel every scheduled task. Running ticks finish on their own.
    pub fn shutdown(&self) {
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            tracing::debug!("[Scheduler:{}] shutting down", self.name);
        }
        self.cancel.cancel();
    }

    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut n = self.live.count.lock();
        while *n > 0 {
            if self.live.cv.wait_until(&mut n, deadline).timed_out() {
                return *n == 0;
            }
        }
        true
    }

    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub fn is_terminated(&self) -> bool {
        self.is_shutdown() && *self.live.count.lock() == 0
    }

    pub fn scheduled_count(&self) -> usize {
        *self.live.count.lock()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Handle of one scheduled task; cancels the task when dropped.
#[derive(Debug)]
pub struct ScheduledTask {
    token: CancelToken,
}

impl ScheduledTask {
    #[inline]
    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
