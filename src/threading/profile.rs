use crate::threading::{BoundedExecutor, ExecutorSettings, InlineExecutor, WorkExecutor, WorkManager};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_MAX_THREADS_ACTIVE: usize = 16;
pub const DEFAULT_MAX_THREADS_IDLE: usize = 1;
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 0;
pub const DEFAULT_THREAD_TTL: Duration = Duration::from_secs(60);
pub const DEFAULT_THREAD_WAIT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_EXHAUSTED_ACTION: ExhaustedAction = ExhaustedAction::Run;
pub const DEFAULT_DO_THREADING: bool = true;

/// What a saturated executor does with new work.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustedAction {
    /// Run the work on the submitting thread.
    #[default]
    Run,
    /// Block the submitter up to `thread_wait_timeout`, then reject.
    Wait,
    /// Reject and surface the error to the submitter.
    Abort,
    /// Drop the new work silently.
    Discard,
    /// Evict the oldest queued work and enqueue the new one.
    DiscardOldest,
}

/// Called for every rejected unit of work, before the exhausted action's
/// own reporting. Lets embedders count or redirect rejections.
pub trait RejectionHandler: Send + Sync + 'static {
    fn rejected(&self, executor: &str, action: ExhaustedAction);
}

/// Replaces the built-in executor construction for a profile.
pub trait WorkManagerFactory: Send + Sync + 'static {
    fn create(&self, profile: &ThreadingProfile, name_prefix: &str) -> Box<dyn WorkExecutor>;
}

/// Sizing and backpressure policy of one bounded executor.
///
/// Immutable value object: the `with_*` methods return a modified copy.
/// Durations are (de)serialized as milliseconds.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ThreadingProfile {
    max_threads_active: usize,
    max_threads_idle: usize,
    max_buffer_size: usize,
    thread_ttl_ms: u64,
    thread_wait_timeout_ms: u64,
    exhausted_action: ExhaustedAction,
    do_threading: bool,
    #[serde(skip)]
    work_manager_factory: Option<Arc<dyn WorkManagerFactory>>,
    #[serde(skip)]
    rejection_handler: Option<Arc<dyn RejectionHandler>>,
}

impl Default for ThreadingProfile {
    fn default() -> Self {
        Self {
            max_threads_active: DEFAULT_MAX_THREADS_ACTIVE,
            max_threads_idle: DEFAULT_MAX_THREADS_IDLE,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            thread_ttl_ms: DEFAULT_THREAD_TTL.as_millis() as u64,
            thread_wait_timeout_ms: DEFAULT_THREAD_WAIT_TIMEOUT.as_millis() as u64,
            exhausted_action: DEFAULT_EXHAUSTED_ACTION,
            do_threading: DEFAULT_DO_THREADING,
            work_manager_factory: None,
            rejection_handler: None,
        }
    }
}

impl ThreadingProfile {
    #[inline]
    pub fn max_threads_active(&self) -> usize {
        self.max_threads_active
    }

    #[inline]
    pub fn max_threads_idle(&self) -> usize {
        self.max_threads_idle
    }

    #[inline]
    pub fn max_buffer_size(&self) -> usize {
        self.max_buffer_size
    }

    #[inline]
    pub fn thread_ttl(&self) -> Duration {
        Duration::from_millis(self.thread_ttl_ms)
    }

    #[inline]
    pub fn thread_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.thread_wait_timeout_ms)
    }

    #[inline]
    pub fn exhausted_action(&self) -> ExhaustedAction {
        self.exhausted_action
    }

    #[inline]
    pub fn do_threading(&self) -> bool {
        self.do_threading
    }

    pub fn rejection_handler(&self) -> Option<&Arc<dyn RejectionHandler>> {
        self.rejection_handler.as_ref()
    }

    pub fn with_max_threads_active(mut self, n: usize) -> Self {
        self.max_threads_active = n.max(1);
        self
    }

    pub fn with_max_threads_idle(mut self, n: usize) -> Self {
        self.max_threads_idle = n;
        self
    }

    pub fn with_max_buffer_size(mut self, n: usize) -> Self {
        self.max_buffer_size = n;
        self
    }

    pub fn with_thread_ttl(mut self, ttl: Duration) -> Self {
        self.thread_ttl_ms = ttl.as_millis() as u64;
        self
    }

    pub fn with_thread_wait_timeout(mut self, timeout: Duration) -> Self {
        self.thread_wait_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_exhausted_action(mut self, action: ExhaustedAction) -> Self {
        self.exhausted_action = action;
        self
    }

    pub fn with_do_threading(mut self, on: bool) -> Self {
        self.do_threading = on;
        self
    }

    pub fn with_work_manager_factory(mut self, factory: Arc<dyn WorkManagerFactory>) -> Self {
        self.work_manager_factory = Some(factory);
        self
    }

    pub fn with_rejection_handler(mut self, handler: Arc<dyn RejectionHandler>) -> Self {
        self.rejection_handler = Some(handler);
        self
    }

    /// Build an executor named `name_prefix` from this profile.
    ///
    /// A configured factory wins; otherwise `do_threading = false` yields an
    /// executor that runs everything on the caller thread.
    pub fn create_work_manager(&self, name_prefix: &str) -> WorkManager {
        let exec: Box<dyn WorkExecutor> = if let Some(factory) = &self.work_manager_factory {
            factory.create(self, name_prefix)
        } else if !self.do_threading {
            Box::new(InlineExecutor::new(name_prefix))
        } else {
            Box::new(BoundedExecutor::new(name_prefix, ExecutorSettings::from(self)))
        };
        WorkManager::new(exec)
    }
}

impl fmt::Debug for ThreadingProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadingProfile")
            .field("max_threads_active", &self.max_threads_active)
            .field("max_threads_idle", &self.max_threads_idle)
            .field("max_buffer_size", &self.max_buffer_size)
            .field("thread_ttl_ms", &self.thread_ttl_ms)
            .field("thread_wait_timeout_ms", &self.thread_wait_timeout_ms)
            .field("exhausted_action", &self.exhausted_action)
            .field("do_threading", &self.do_threading)
            .field("custom_factory", &self.work_manager_factory.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_match_constants() {
        let p = ThreadingProfile::default();
        assert_eq!(p.max_threads_active(), DEFAULT_MAX_THREADS_ACTIVE);
        assert_eq!(p.max_threads_idle(), DEFAULT_MAX_THREADS_IDLE);
        assert_eq!(p.max_buffer_size(), DEFAULT_MAX_BUFFER_SIZE);
        assert_eq!(p.thread_ttl(), DEFAULT_THREAD_TTL);
        assert_eq!(p.thread_wait_timeout(), DEFAULT_THREAD_WAIT_TIMEOUT);
        assert_eq!(p.exhausted_action(), ExhaustedAction::Run);
        assert!(p.do_threading());
    }

    #[test]
    fn builder_leaves_original_untouched() {
        let base = ThreadingProfile::default();
        let p = base
            .clone()
            .with_max_threads_active(2)
            .with_exhausted_action(ExhaustedAction::DiscardOldest);
        assert_eq!(base.max_threads_active(), DEFAULT_MAX_THREADS_ACTIVE);
        assert_eq!(p.max_threads_active(), 2);
        assert_eq!(p.exhausted_action(), ExhaustedAction::DiscardOldest);
    }

    #[test]
    fn deserializes_partial_config() {
        let p: ThreadingProfile = serde_json::from_value(json!({
            "max_threads_active": 4,
            "thread_wait_timeout_ms": 250,
            "exhausted_action": "discard_oldest"
        }))
        .unwrap();
        assert_eq!(p.max_threads_active(), 4);
        assert_eq!(p.thread_wait_timeout(), Duration::from_millis(250));
        assert_eq!(p.exhausted_action(), ExhaustedAction::DiscardOldest);
        assert_eq!(p.max_threads_idle(), DEFAULT_MAX_THREADS_IDLE);
    }

    #[test]
    fn no_threading_builds_inline_executor() {
        let wm = ThreadingProfile::default()
            .with_do_threading(false)
            .create_work_manager("inline");
        let (tx, rx) = std::sync::mpsc::channel();
        let caller = std::thread::current().id();
        wm.do_work(Box::new(move || {
            tx.send(std::thread::current().id()).unwrap();
        }))
        .unwrap();
        assert_eq!(rx.recv().unwrap(), caller);
    }
}
