use crate::error::LifecycleError;
use parking_lot::Mutex;
use std::fmt;

/// Phases of the initialise/start/stop/dispose state machine.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum LifecyclePhase {
    Uninitialised,
    Initialising,
    Initialised,
    Starting,
    Started,
    Stopping,
    Stopped,
    Disposing,
    Disposed,
}

impl LifecyclePhase {
    /// True while a transition body is running.
    #[inline]
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Initialising | Self::Starting | Self::Stopping | Self::Disposing
        )
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uninitialised => "uninitialised",
            Self::Initialising => "initialising",
            Self::Initialised => "initialised",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Disposing => "disposing",
            Self::Disposed => "disposed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Transition {
    Initialise,
    Start,
    Stop,
    Dispose,
}

impl Transition {
    /// Phase held while the transition body runs.
    #[inline]
    pub fn transient(self) -> LifecyclePhase {
        match self {
            Self::Initialise => LifecyclePhase::Initialising,
            Self::Start => LifecyclePhase::Starting,
            Self::Stop => LifecyclePhase::Stopping,
            Self::Dispose => LifecyclePhase::Disposing,
        }
    }

    /// Phase committed once the body returns.
    #[inline]
    pub fn target(self) -> LifecyclePhase {
        match self {
            Self::Initialise => LifecyclePhase::Initialised,
            Self::Start => LifecyclePhase::Started,
            Self::Stop => LifecyclePhase::Stopped,
            Self::Dispose => LifecyclePhase::Disposed,
        }
    }

    /// Whether `self` may begin from `phase`.
    pub fn allowed_from(self, phase: LifecyclePhase) -> bool {
        use LifecyclePhase::*;
        match self {
            Self::Initialise => phase == Uninitialised,
            Self::Start => matches!(phase, Initialised | Stopped),
            Self::Stop => phase == Started,
            Self::Dispose => !phase.is_transient() && phase != Disposed,
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initialise => "initialise",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Dispose => "dispose",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
struct Inner {
    current: LifecyclePhase,
    last_failure: Option<Transition>,
}

/// Guarded lifecycle state shared by every lifecycle-bearing component.
///
/// A transition is split in two steps: [`begin`](Self::begin) validates the
/// request and moves to the transient phase (`Starting`, ...), then the
/// returned [`PhaseGuard`] commits the target phase when dropped. Concurrent
/// callers racing on the same transition see the transient phase and fail
/// immediately.
///
/// Commit is forward-only: a failing transition body still lands on the
/// target phase and is recorded in [`last_failure`](Self::last_failure), so
/// the owner can always be cleaned up through `stop`/`dispose`.
#[derive(Debug)]
pub struct LifecycleState {
    name: String,
    inner: Mutex<Inner>,
}

impl LifecycleState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner {
                current: LifecyclePhase::Uninitialised,
                last_failure: None,
            }),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn phase(&self) -> LifecyclePhase {
        self.inner.lock().current
    }

    pub fn begin(&self, transition: Transition) -> Result<PhaseGuard<'_>, LifecycleError> {
        let mut inner = self.inner.lock();
        if !transition.allowed_from(inner.current) {
            return Err(LifecycleError::new(
                self.name.clone(),
                inner.current,
                transition,
            ));
        }
        inner.current = transition.transient();
        Ok(PhaseGuard {
            state: self,
            transition,
            failed: false,
        })
    }

    /// Validate, run `body`, then commit the target phase whatever the outcome.
    pub fn run<E, F>(&self, transition: Transition, body: F) -> Result<(), E>
    where
        E: From<LifecycleError>,
        F: FnOnce() -> Result<(), E>,
    {
        let mut guard = self.begin(transition)?;
        let res = body();
        if res.is_err() {
            guard.mark_failed();
        }
        res
    }

    /// Check that `transition` could begin now, without changing state.
    pub fn check(&self, transition: Transition) -> Result<(), LifecycleError> {
        let current = self.phase();
        if transition.allowed_from(current) {
            Ok(())
        } else {
            Err(LifecycleError::new(self.name.clone(), current, transition))
        }
    }

    /// Transition whose body failed most recently, cleared on the next clean one.
    pub fn last_failure(&self) -> Option<Transition> {
        self.inner.lock().last_failure
    }

    #[inline]
    pub fn is_initialised(&self) -> bool {
        self.phase() == LifecyclePhase::Initialised
    }

    #[inline]
    pub fn is_starting(&self) -> bool {
        self.phase() == LifecyclePhase::Starting
    }

    #[inline]
    pub fn is_started(&self) -> bool {
        self.phase() == LifecyclePhase::Started
    }

    #[inline]
    pub fn is_stopping(&self) -> bool {
        self.phase() == LifecyclePhase::Stopping
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.phase() == LifecyclePhase::Stopped
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.phase() == LifecyclePhase::Disposed
    }

    fn commit(&self, transition: Transition, failed: bool) {
        let mut inner = self.inner.lock();
        inner.current = transition.target();
        inner.last_failure = if failed { Some(transition) } else { None };
    }
}

/// Holds a transient phase; commits the transition's target phase on drop.
pub struct PhaseGuard<'a> {
    state: &'a LifecycleState,
    transition: Transition,
    failed: bool,
}

impl PhaseGuard<'_> {
    #[inline]
    pub fn transition(&self) -> Transition {
        self.transition
    }

    #[inline]
    pub fn mark_failed(&mut self) {
        self.failed = true;
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        // a panicking body counts as failed
        let failed = self.failed || std::thread::panicking();
        self.state.commit(self.transition, failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn walks_full_cycle() {
        let st = LifecycleState::new("c");
        st.run::<LifecycleError, _>(Transition::Initialise, || Ok(()))
            .unwrap();
        assert!(st.is_initialised());
        for _ in 0..3 {
            st.run::<LifecycleError, _>(Transition::Start, || Ok(()))
                .unwrap();
            assert!(st.is_started());
            st.run::<LifecycleError, _>(Transition::Stop, || Ok(()))
                .unwrap();
            assert!(st.is_stopped());
        }
        st.run::<LifecycleError, _>(Transition::Dispose, || Ok(()))
            .unwrap();
        assert!(st.is_disposed());
    }

    #[test]
    fn rejects_repeated_transitions() {
        let st = LifecycleState::new("c");
        st.begin(Transition::Initialise).unwrap();
        let err = st.begin(Transition::Initialise).err().unwrap();
        assert_eq!(err.phase, LifecyclePhase::Initialised);
        assert_eq!(err.attempted, Transition::Initialise);

        assert!(st.begin(Transition::Stop).is_err());
        st.begin(Transition::Start).unwrap();
        assert!(st.begin(Transition::Start).is_err());
        st.begin(Transition::Stop).unwrap();
        assert!(st.begin(Transition::Stop).is_err());
        st.begin(Transition::Dispose).unwrap();
        assert!(st.begin(Transition::Dispose).is_err());
        assert!(st.begin(Transition::Start).is_err());
        assert!(st.begin(Transition::Initialise).is_err());
    }

    #[test]
    fn failed_body_still_advances() {
        let st = LifecycleState::new("c");
        st.begin(Transition::Initialise).unwrap();
        let res: Result<(), anyhow::Error> = st.run(Transition::Start, || {
            Err(anyhow::anyhow!("receiver unreachable"))
        });
        assert!(res.is_err());
        assert!(st.is_started());
        assert_eq!(st.last_failure(), Some(Transition::Start));

        st.begin(Transition::Stop).unwrap();
        assert!(st.is_stopped());
        assert_eq!(st.last_failure(), None);
    }

    #[test]
    fn concurrent_starts_only_one_wins() {
        let st = Arc::new(LifecycleState::new("c"));
        st.begin(Transition::Initialise).unwrap();

        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let st = st.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    st.run::<LifecycleError, _>(Transition::Start, || {
                        thread::sleep(Duration::from_millis(20));
                        Ok(())
                    })
                    .is_ok()
                })
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(wins, 1);
        assert!(st.is_started());
    }

    #[test]
    fn transient_phase_blocks_everything() {
        let st = LifecycleState::new("c");
        let _g = st.begin(Transition::Initialise).unwrap();
        assert_eq!(st.phase(), LifecyclePhase::Initialising);
        for t in [
            Transition::Initialise,
            Transition::Start,
            Transition::Stop,
            Transition::Dispose,
        ] {
            assert!(st.check(t).is_err());
        }
    }
}
