pub use handler::*;
pub use state::*;

mod handler;
mod state;

use crate::error::ConnectorResult;

/// initialise → start ⇄ stop → dispose, driven through a [`LifecycleState`].
///
/// Every method takes `&self`: pooled and registered components are shared
/// behind `Arc` and may be transitioned from any thread.
pub trait Lifecycle: Send + Sync {
    fn lifecycle_state(&self) -> &LifecycleState;

    fn initialise(&self) -> ConnectorResult<()>;

    fn start(&self) -> ConnectorResult<()>;

    fn stop(&self) -> ConnectorResult<()>;

    fn dispose(&self) -> ConnectorResult<()>;

    #[inline]
    fn is_started(&self) -> bool {
        self.lifecycle_state().is_started()
    }

    #[inline]
    fn is_disposed(&self) -> bool {
        self.lifecycle_state().is_disposed()
    }
}

/// Connect/disconnect capability, orthogonal to [`Lifecycle`].
///
/// `connect` must not reach the transport again when already connected,
/// and `disconnect` is a no-op when not connected.
pub trait Connectable: Lifecycle {
    fn connect(&self) -> ConnectorResult<()>;

    fn disconnect(&self) -> ConnectorResult<()>;

    fn is_connected(&self) -> bool;
}

/// connect + start, skipping whatever is already done.
pub fn activate<T: Connectable + ?Sized>(obj: &T) -> ConnectorResult<()> {
    obj.connect()?;
    if !obj.is_started() {
        obj.start()?;
    }
    Ok(())
}

/// stop + disconnect, skipping whatever is already done.
/// Both steps are attempted; the first error is returned.
pub fn passivate<T: Connectable + ?Sized>(obj: &T) -> ConnectorResult<()> {
    let stopped = if obj.is_started() {
        obj.stop()
    } else {
        Ok(())
    };
    let disconnected = obj.disconnect();
    stopped.and(disconnected)
}

/// stop + disconnect + dispose. Failures are logged, never propagated.
pub fn teardown<T: Connectable + ?Sized>(obj: &T) {
    let name = obj.lifecycle_state().name();
    if let Err(err) = passivate(obj) {
        tracing::warn!("[{}] failed to passivate during teardown: {}", name, err);
    }
    if !obj.is_disposed()
        && let Err(err) = obj.dispose()
    {
        tracing::warn!("[{}] failed to dispose: {}", name, err);
    }
}
