use crate::error::{ConnectorError, ConnectorResult};
use crate::lifecycle::{Connectable, Lifecycle, LifecycleState, Transition};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Transport-specific hooks invoked by [`TransportHandler`] around its own
/// lifecycle and connection bookkeeping. Every hook defaults to a no-op.
pub trait TransportHooks: Send + Sync + 'static {
    fn do_initialise(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn do_connect(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn do_disconnect(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn do_start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn do_stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn do_dispose(&self) {}
}

/// Lifecycle + connection state shared by receivers, dispatchers and requesters.
///
/// The backend only supplies the `do_*` hooks; ordering guards, connection
/// idempotence and the implicit connect-on-start live here.
pub struct TransportHandler<B: ?Sized> {
    state: LifecycleState,
    connected: AtomicBool,
    connect_lock: Mutex<()>,
    backend: Box<B>,
}

impl<B: TransportHooks + ?Sized> TransportHandler<B> {
    pub fn new(name: impl Into<String>, backend: Box<B>) -> Self {
        Self {
            state: LifecycleState::new(name),
            connected: AtomicBool::new(false),
            connect_lock: Mutex::new(()),
            backend,
        }
    }

    /// Mark the handler as connected without calling `do_connect`, for
    /// backends handed an already-open resource.
    pub fn assume_connected(self) -> Self {
        self.connected.store(true, Ordering::Release);
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        self.state.name()
    }

    #[inline]
    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: TransportHooks + ?Sized> Lifecycle for TransportHandler<B> {
    fn lifecycle_state(&self) -> &LifecycleState {
        &self.state
    }

    fn initialise(&self) -> ConnectorResult<()> {
        self.state.run(Transition::Initialise, || {
            self.backend.do_initialise().map_err(ConnectorError::Transport)
        })
    }

    fn start(&self) -> ConnectorResult<()> {
        self.state.run(Transition::Start, || {
            self.connect()?;
            self.backend.do_start().map_err(ConnectorError::Transport)
        })
    }

    fn stop(&self) -> ConnectorResult<()> {
        self.state.run(Transition::Stop, || {
            self.backend.do_stop().map_err(ConnectorError::Transport)
        })
    }

    fn dispose(&self) -> ConnectorResult<()> {
        if self.state.is_started()
            && let Err(err) = self.stop()
        {
            tracing::warn!("[{}] stop before dispose failed: {}", self.name(), err);
        }
        self.state.run(Transition::Dispose, || {
            if let Err(err) = self.disconnect() {
                tracing::warn!("[{}] disconnect before dispose failed: {}", self.name(), err);
            }
            self.backend.do_dispose();
            Ok(())
        })
    }
}

impl<B: TransportHooks + ?Sized> Connectable for TransportHandler<B> {
    fn connect(&self) -> ConnectorResult<()> {
        if self.state.is_disposed() {
            return Err(ConnectorError::Disposed(self.name().to_string()));
        }
        let _guard = self.connect_lock.lock();
        if self.connected.load(Ordering::Acquire) {
            return Ok(());
        }
        self.backend
            .do_connect()
            .map_err(|err| ConnectorError::connection(self.name(), err))?;
        self.connected.store(true, Ordering::Release);
        tracing::debug!("[{}] connected", self.name());
        Ok(())
    }

    fn disconnect(&self) -> ConnectorResult<()> {
        let _guard = self.connect_lock.lock();
        if !self.connected.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::debug!("[{}] disconnected", self.name());
        self.backend
            .do_disconnect()
            .map_err(|err| ConnectorError::connection(self.name(), err))
    }

    #[inline]
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

impl<B: ?Sized> fmt::Debug for TransportHandler<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportHandler")
            .field("name", &self.state.name())
            .field("phase", &self.state.phase())
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counting {
        connects: Arc<AtomicUsize>,
        disconnects: Arc<AtomicUsize>,
        fail_connect: bool,
    }

    impl TransportHooks for Counting {
        fn do_connect(&self) -> anyhow::Result<()> {
            if self.fail_connect {
                anyhow::bail!("unreachable");
            }
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn do_disconnect(&self) -> anyhow::Result<()> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn full_lifecycle() {
        let h = TransportHandler::new("out", Box::new(Counting::default()));
        h.initialise().unwrap();
        assert!(h.lifecycle_state().is_initialised());
        h.connect().unwrap();
        assert!(h.is_connected());
        h.start().unwrap();
        assert!(h.is_started());
        h.stop().unwrap();
        assert!(h.lifecycle_state().is_stopped());
        h.disconnect().unwrap();
        assert!(!h.is_connected());
        h.dispose().unwrap();
        assert!(h.lifecycle_state().is_disposed());
    }

    #[test]
    fn connect_is_idempotent() {
        let connects = Arc::new(AtomicUsize::new(0));
        let h = TransportHandler::new(
            "out",
            Box::new(Counting {
                connects: connects.clone(),
                ..Default::default()
            }),
        );
        h.connect().unwrap();
        h.connect().unwrap();
        h.initialise().unwrap();
        // start connects implicitly, already connected here
        h.start().unwrap();
        assert_eq!(connects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn already_connected_skips_connect_hook() {
        let connects = Arc::new(AtomicUsize::new(0));
        let h = TransportHandler::new(
            "in",
            Box::new(Counting {
                connects: connects.clone(),
                ..Default::default()
            }),
        )
        .assume_connected();
        assert!(h.is_connected());
        h.connect().unwrap();
        assert_eq!(connects.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn disconnect_when_disconnected_is_noop() {
        let disconnects = Arc::new(AtomicUsize::new(0));
        let h = TransportHandler::new(
            "in",
            Box::new(Counting {
                disconnects: disconnects.clone(),
                ..Default::default()
            }),
        );
        h.disconnect().unwrap();
        h.connect().unwrap();
        h.disconnect().unwrap();
        h.disconnect().unwrap();
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_connect_surfaces_and_start_still_advances() {
        let h = TransportHandler::new(
            "in",
            Box::new(Counting {
                fail_connect: true,
                ..Default::default()
            }),
        );
        h.initialise().unwrap();
        let err = h.start().unwrap_err();
        assert!(matches!(err, ConnectorError::Connection { .. }));
        assert!(!h.is_connected());
        assert!(h.is_started());
        h.stop().unwrap();
        h.dispose().unwrap();
    }

    #[test]
    fn dispose_stops_and_disconnects() {
        let disconnects = Arc::new(AtomicUsize::new(0));
        let h = TransportHandler::new(
            "in",
            Box::new(Counting {
                disconnects: disconnects.clone(),
                ..Default::default()
            }),
        );
        h.initialise().unwrap();
        h.start().unwrap();
        h.dispose().unwrap();
        assert!(h.lifecycle_state().is_disposed());
        assert!(!h.is_connected());
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
        assert!(matches!(h.connect(), Err(ConnectorError::Disposed(_))));
    }
}
