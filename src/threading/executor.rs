use crate::error::{RejectReason, RejectedError};
use crate::threading::{ExhaustedAction, RejectionHandler, ThreadingProfile};
use crate::warn_throttled;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const REJECT_LOG_INTERVAL: Duration = Duration::from_secs(5);

pub type Work = Box<dyn FnOnce() + Send + 'static>;

/// Point-in-time counters of an executor.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct ExecutorStats {
    pub pool_size: usize,
    pub active: usize,
    pub queued: usize,
    pub completed: u64,
    pub rejected: u64,
}

/// Asynchronous submission of units of work.
pub trait WorkExecutor: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Submit `work`. Saturation is resolved by the executor's exhausted
    /// action; only rejections surface as `Err`.
    fn do_work(&self, work: Work) -> Result<(), RejectedError>;

    /// Stop accepting work. Queued work still runs.
    fn shutdown(&self);

    /// Stop accepting work and drop everything still queued.
    /// Returns how many queued units were dropped.
    fn shutdown_now(&self) -> usize;

    /// Block until every worker exited or `timeout` elapsed.
    fn await_termination(&self, timeout: Duration) -> bool;

    fn is_shutdown(&self) -> bool;

    fn is_terminated(&self) -> bool;

    fn stats(&self) -> ExecutorStats;
}

/// Sizing of a [`BoundedExecutor`], extracted from a [`ThreadingProfile`].
#[derive(Clone)]
pub struct ExecutorSettings {
    pub max_active: usize,
    pub max_idle: usize,
    pub capacity: usize,
    pub ttl: Duration,
    pub wait_timeout: Duration,
    pub action: ExhaustedAction,
    pub rejection_handler: Option<Arc<dyn RejectionHandler>>,
}

impl From<&ThreadingProfile> for ExecutorSettings {
    fn from(p: &ThreadingProfile) -> Self {
        Self {
            max_active: p.max_threads_active().max(1),
            max_idle: p.max_threads_idle().min(p.max_threads_active()),
            capacity: p.max_buffer_size(),
            ttl: p.thread_ttl(),
            wait_timeout: p.thread_wait_timeout(),
            action: p.exhausted_action(),
            rejection_handler: p.rejection_handler().cloned(),
        }
    }
}

struct State {
    queue: VecDeque<Work>,
    workers: usize,
    idle: usize,
    shutdown: bool,
}

enum Placement {
    Queued,
    Spawn(Work),
    Full(Work),
}

impl State {
    /// Hand `work` to an idle worker, a new worker or the buffer, in that order.
    fn place(&mut self, work: Work, s: &ExecutorSettings) -> Placement {
        if self.idle > self.queue.len() {
            self.queue.push_back(work);
            Placement::Queued
        } else if self.workers < s.max_active {
            self.workers += 1;
            Placement::Spawn(work)
        } else if self.queue.len() < self.idle + s.capacity {
            self.queue.push_back(work);
            Placement::Queued
        } else {
            Placement::Full(work)
        }
    }
}

struct Shared {
    name: String,
    settings: ExecutorSettings,
    state: Mutex<State>,
    work_cv: Condvar,
    space_cv: Condvar,
    term_cv: Condvar,
    active: AtomicUsize,
    completed: AtomicU64,
    rejected: AtomicU64,
    next_id: AtomicUsize,
}

impl Shared {
    fn run(&self, work: Work) {
        self.active.fetch_add(1, Ordering::AcqRel);
        if let Err(panic) = catch_unwind(AssertUnwindSafe(work)) {
            tracing::error!(
                "[Executor:{}] work panicked: {}",
                self.name,
                panic_message(&panic)
            );
        }
        self.active.fetch_sub(1, Ordering::AcqRel);
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    fn reject(&self, reason: RejectReason) -> RejectedError {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        if let Some(h) = &self.settings.rejection_handler {
            h.rejected(&self.name, self.settings.action);
        }
        warn_throttled!(
            REJECT_LOG_INTERVAL,
            "[Executor:{}] {} (action {:?})",
            self.name,
            reason,
            self.settings.action
        );
        RejectedError::new(self.name.clone(), reason)
    }

    /// Next unit for a worker, or `None` when it should exit.
    fn next_work(&self) -> Option<Work> {
        let mut st = self.state.lock();
        st.idle += 1;
        self.space_cv.notify_one();
        let mut deadline = Instant::now() + self.settings.ttl;
        let work = loop {
            if let Some(w) = st.queue.pop_front() {
                break Some(w);
            }
            if st.shutdown {
                break None;
            }
            if self.work_cv.wait_until(&mut st, deadline).timed_out() && st.queue.is_empty() {
                if st.workers > self.settings.max_idle {
                    break None;
                }
                deadline = Instant::now() + self.settings.ttl;
            }
        };
        st.idle -= 1;
        match work {
            Some(w) => {
                self.space_cv.notify_one();
                Some(w)
            }
            None => {
                st.workers -= 1;
                self.space_cv.notify_all();
                if st.workers == 0 {
                    self.term_cv.notify_all();
                }
                None
            }
        }
    }
}

fn worker_loop(shared: Arc<Shared>, first: Work) {
    shared.run(first);
    while let Some(work) = shared.next_work() {
        shared.run(work);
    }
}

pub(crate) fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Thread pool capped at `max_active` workers with a bounded buffer and a
/// configurable [`ExhaustedAction`].
///
/// Workers are spawned on demand; a worker idle for longer than the TTL
/// exits while more than `max_idle` workers are alive. `capacity == 0`
/// means direct handoff: work is only queued when an idle worker will take it.
pub struct BoundedExecutor {
    shared: Arc<Shared>,
}

impl BoundedExecutor {
    pub fn new(name: impl Into<String>, settings: ExecutorSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                settings,
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    workers: 0,
                    idle: 0,
                    shutdown: false,
                }),
                work_cv: Condvar::new(),
                space_cv: Condvar::new(),
                term_cv: Condvar::new(),
                active: AtomicUsize::new(0),
                completed: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
                next_id: AtomicUsize::new(1),
            }),
        }
    }

    pub fn from_profile(name: impl Into<String>, profile: &ThreadingProfile) -> Self {
        Self::new(name, ExecutorSettings::from(profile))
    }

    fn spawn(&self, work: Work) -> Result<(), RejectedError> {
        let sh = &self.shared;
        let id = sh.next_id.fetch_add(1, Ordering::Relaxed);
        let shared = sh.clone();
        let res = thread::Builder::new()
            .name(format!("{}.{:02}", sh.name, id))
            .spawn(move || worker_loop(shared, work));
        if let Err(err) = res {
            tracing::error!("[Executor:{}] failed to spawn worker: {}", sh.name, err);
            let mut st = sh.state.lock();
            st.workers -= 1;
            if st.workers == 0 {
                sh.term_cv.notify_all();
            }
            drop(st);
            return Err(sh.reject(RejectReason::Aborted));
        }
        Ok(())
    }

    fn on_full(&self, work: Work) -> Result<(), RejectedError> {
        let sh = &self.shared;
        match sh.settings.action {
            ExhaustedAction::Run => {
                sh.run(work);
                Ok(())
            }
            ExhaustedAction::Abort => Err(sh.reject(RejectReason::Aborted)),
            ExhaustedAction::Discard => {
                drop(work);
                sh.reject(RejectReason::Discarded);
                Ok(())
            }
            ExhaustedAction::DiscardOldest => {
                let mut st = sh.state.lock();
                if st.shutdown {
                    drop(st);
                    return Err(sh.reject(RejectReason::Shutdown));
                }
                match st.place(work, &sh.settings) {
                    Placement::Queued => {
                        sh.work_cv.notify_one();
                        Ok(())
                    }
                    Placement::Spawn(work) => {
                        drop(st);
                        self.spawn(work)
                    }
                    Placement::Full(work) => {
                        if st.queue.pop_front().is_some() {
                            st.queue.push_back(work);
                            sh.work_cv.notify_one();
                        } else {
                            drop(work);
                        }
                        drop(st);
                        sh.reject(RejectReason::Discarded);
                        Ok(())
                    }
                }
            }
            ExhaustedAction::Wait => {
                let deadline = Instant::now() + sh.settings.wait_timeout;
                let mut st = sh.state.lock();
                let mut work = work;
                loop {
                    if st.shutdown {
                        drop(st);
                        return Err(sh.reject(RejectReason::Shutdown));
                    }
                    match st.place(work, &sh.settings) {
                        Placement::Queued => {
                            sh.work_cv.notify_one();
                            return Ok(());
                        }
                        Placement::Spawn(w) => {
                            drop(st);
                            return self.spawn(w);
                        }
                        Placement::Full(w) => work = w,
                    }
                    if sh.space_cv.wait_until(&mut st, deadline).timed_out() {
                        if st.shutdown {
                            drop(st);
                            return Err(sh.reject(RejectReason::Shutdown));
                        }
                        // one last attempt with the lock held
                        return match st.place(work, &sh.settings) {
                            Placement::Queued => {
                                sh.work_cv.notify_one();
                                Ok(())
                            }
                            Placement::Spawn(w) => {
                                drop(st);
                                self.spawn(w)
                            }
                            Placement::Full(w) => {
                                drop(st);
                                drop(w);
                                Err(sh.reject(RejectReason::WaitTimeout))
                            }
                        };
                    }
                }
            }
        }
    }
}

impl WorkExecutor for BoundedExecutor {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn do_work(&self, work: Work) -> Result<(), RejectedError> {
        let sh = &self.shared;
        let mut st = sh.state.lock();
        if st.shutdown {
            drop(st);
            return Err(sh.reject(RejectReason::Shutdown));
        }
        match st.place(work, &sh.settings) {
            Placement::Queued => {
                sh.work_cv.notify_one();
                Ok(())
            }
            Placement::Spawn(work) => {
                drop(st);
                self.spawn(work)
            }
            Placement::Full(work) => {
                drop(st);
                self.on_full(work)
            }
        }
    }

    fn shutdown(&self) {
        let sh = &self.shared;
        let mut st = sh.state.lock();
        if !st.shutdown {
            st.shutdown = true;
            tracing::debug!("[Executor:{}] shutting down", sh.name);
        }
        sh.work_cv.notify_all();
        sh.space_cv.notify_all();
        if st.workers == 0 {
            sh.term_cv.notify_all();
        }
    }

    fn shutdown_now(&self) -> usize {
        self.shutdown();
        let mut st = self.shared.state.lock();
        let dropped = st.queue.len();
        st.queue.clear();
        dropped
    }

    fn await_termination(&self, timeout: Duration) -> bool {
        let sh = &self.shared;
        let deadline = Instant::now() + timeout;
        let mut st = sh.state.lock();
        while st.workers > 0 {
            if sh.term_cv.wait_until(&mut st, deadline).timed_out() {
                return st.workers == 0;
            }
        }
        true
    }

    fn is_shutdown(&self) -> bool {
        self.shared.state.lock().shutdown
    }

    fn is_terminated(&self) -> bool {
        let st = self.shared.state.lock();
        st.shutdown && st.workers == 0
    }

    fn stats(&self) -> ExecutorStats {
        let sh = &self.shared;
        let st = sh.state.lock();
        ExecutorStats {
            pool_size: st.workers,
            active: sh.active.load(Ordering::Acquire),
            queued: st.queue.len(),
            completed: sh.completed.load(Ordering::Relaxed),
            rejected: sh.rejected.load(Ordering::Relaxed),
        }
    }
}

impl Drop for BoundedExecutor {
    fn drop(&mut self) {
        // idle workers would otherwise linger until their TTL
        self.shutdown();
    }
}

/// Runs every unit of work on the submitting thread.
pub struct InlineExecutor {
    name: String,
    shutdown: AtomicBool,
    completed: AtomicU64,
    rejected: AtomicU64,
}

impl InlineExecutor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shutdown: AtomicBool::new(false),
            completed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }
}

impl WorkExecutor for InlineExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn do_work(&self, work: Work) -> Result<(), RejectedError> {
        if self.shutdown.load(Ordering::Acquire) {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(RejectedError::new(self.name.clone(), RejectReason::Shutdown));
        }
        if let Err(panic) = catch_unwind(AssertUnwindSafe(work)) {
            tracing::error!(
                "[Executor:{}] work panicked: {}",
                self.name,
                panic_message(&panic)
            );
        }
        self.completed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    fn shutdown_now(&self) -> usize {
        self.shutdown();
        0
    }

    fn await_termination(&self, _timeout: Duration) -> bool {
        true
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn is_terminated(&self) -> bool {
        self.is_shutdown()
    }

    fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            completed: self.completed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            ..Default::default()
        }
    }
}
