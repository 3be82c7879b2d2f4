use crate::error::RejectedError;
use crate::threading::{ExecutorStats, Work, WorkExecutor};
use std::fmt;
use std::time::Duration;

/// Owned handle over one role's executor (receiver, dispatcher or requester).
pub struct WorkManager {
    exec: Box<dyn WorkExecutor>,
}

impl WorkManager {
    pub fn new(exec: Box<dyn WorkExecutor>) -> Self {
        Self { exec }
    }

    #[inline]
    pub fn name(&self) -> &str {
        self.exec.name()
    }

    #[inline]
    pub fn do_work(&self, work: Work) -> Result<(), RejectedError> {
        self.exec.do_work(work)
    }

    /// Boxing shorthand for [`do_work`](Self::do_work).
    pub fn execute<F>(&self, f: F) -> Result<(), RejectedError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.exec.do_work(Box::new(f))
    }

    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.exec.is_shutdown()
    }

    #[inline]
    pub fn is_terminated(&self) -> bool {
        self.exec.is_terminated()
    }

    #[inline]
    pub fn stats(&self) -> ExecutorStats {
        self.exec.stats()
    }

    /// Graceful shutdown: stop intake, let queued and running work finish
    /// within `timeout`, then drop whatever is still queued.
    /// Returns true when every worker exited in time.
    pub fn dispose(&self, timeout: Duration) -> bool {
        self.exec.shutdown();
        if self.exec.await_termination(timeout) {
            return true;
        }
        let dropped = self.exec.shutdown_now();
        tracing::warn!(
            "[Executor:{}] not terminated after {:?}, dropped {} queued unit(s)",
            self.name(),
            timeout,
            dropped
        );
        false
    }
}

impl fmt::Debug for WorkManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkManager")
            .field("name", &self.name())
            .field("stats", &self.stats())
            .finish()
    }
}
