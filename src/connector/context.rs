use crate::error::ConnectorError;
use crate::error_throttled;
use crate::utils::CancelToken;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Sink for failures that happen off the caller's thread: one-way dispatch
/// work, poll ticks, asynchronously routed events.
pub trait ExceptionListener: Send + Sync + 'static {
    fn on_exception(&self, source: &str, err: &ConnectorError);
}

impl<F> ExceptionListener for F
where
    F: Fn(&str, &ConnectorError) + Send + Sync + 'static,
{
    fn on_exception(&self, source: &str, err: &ConnectorError) {
        self(source, err)
    }
}

/// Logs through `tracing`, rate limited so a failing poll loop cannot
/// flood the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingExceptionListener;

impl ExceptionListener for LoggingExceptionListener {
    fn on_exception(&self, source: &str, err: &ConnectorError) {
        error_throttled!(Duration::from_secs(1), "[{}] {}", source, err);
    }
}

/// Collaborators handed to a connector by whatever composes it.
#[derive(Clone)]
pub struct ConnectorContext {
    exception_listener: Arc<dyn ExceptionListener>,
    shutdown_timeout: Duration,
    cancel: CancelToken,
}

impl Default for ConnectorContext {
    fn default() -> Self {
        Self {
            exception_listener: Arc::new(LoggingExceptionListener),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            cancel: CancelToken::new_root(),
        }
    }
}

impl ConnectorContext {
    pub fn with_exception_listener(mut self, listener: Arc<dyn ExceptionListener>) -> Self {
        self.exception_listener = listener;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Connectors built from this context cancel their reconnect sleeps and
    /// scheduled tasks when `parent` is cancelled.
    pub fn with_cancel_token(mut self, parent: &CancelToken) -> Self {
        self.cancel = parent.new_child();
        self
    }

    #[inline]
    pub fn exception_listener(&self) -> &Arc<dyn ExceptionListener> {
        &self.exception_listener
    }

    #[inline]
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    #[inline]
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }
}

impl fmt::Debug for ConnectorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorContext")
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("cancel", &self.cancel)
            .finish()
    }
}
