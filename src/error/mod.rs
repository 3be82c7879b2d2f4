use crate::lifecycle::{LifecyclePhase, Transition};
use std::{error::Error, fmt};

const ERR_MSG_SHUTDOWN: &str = "executor is shut down";
const ERR_MSG_ABORTED: &str = "executor is saturated, work aborted";
const ERR_MSG_WAIT_TIMEOUT: &str = "timed out waiting for executor capacity";
const ERR_MSG_DISCARDED: &str = "work discarded";

pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// A lifecycle transition was requested from a phase that does not allow it.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LifecycleError {
    pub component: String,
    pub phase: LifecyclePhase,
    pub attempted: Transition,
}

impl LifecycleError {
    pub fn new(component: impl Into<String>, phase: LifecyclePhase, attempted: Transition) -> Self {
        Self {
            component: component.into(),
            phase,
            attempted,
        }
    }
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "illegal lifecycle transition: cannot {} '{}' while {}",
            self.attempted, self.component, self.phase
        )
    }
}

impl Error for LifecycleError {}

/// Why an executor refused a unit of work.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RejectReason {
    Shutdown,
    Aborted,
    WaitTimeout,
    Discarded,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Shutdown => write!(f, "{ERR_MSG_SHUTDOWN}"),
            RejectReason::Aborted => write!(f, "{ERR_MSG_ABORTED}"),
            RejectReason::WaitTimeout => write!(f, "{ERR_MSG_WAIT_TIMEOUT}"),
            RejectReason::Discarded => write!(f, "{ERR_MSG_DISCARDED}"),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RejectedError {
    pub executor: String,
    pub reason: RejectReason,
}

impl RejectedError {
    pub fn new(executor: impl Into<String>, reason: RejectReason) -> Self {
        Self {
            executor: executor.into(),
            reason,
        }
    }
}

impl fmt::Display for RejectedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.executor, self.reason)
    }
}

impl Error for RejectedError {}

#[derive(Debug)]
pub enum ConnectorError {
    /// Lifecycle ordering violation; never retried.
    Lifecycle(LifecycleError),
    /// The connector must be started to dispatch or request.
    NotStarted {
        connector: String,
        phase: LifecyclePhase,
    },
    /// A pooled dispatcher or requester was used before it was started.
    NotReady {
        component: String,
        phase: LifecyclePhase,
    },
    InvalidArgument(String),
    Connection {
        resource: String,
        source: anyhow::Error,
    },
    PoolExhausted {
        key: String,
        max_active: usize,
    },
    Rejected(RejectedError),
    Dispatch {
        endpoint: String,
        source: anyhow::Error,
    },
    Request {
        endpoint: String,
        source: anyhow::Error,
    },
    Poll {
        receiver: String,
        source: anyhow::Error,
    },
    Transport(anyhow::Error),
    Disposed(String),
}

impl ConnectorError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn connection(resource: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Connection {
            resource: resource.into(),
            source,
        }
    }

    #[inline]
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::Lifecycle(_) | Self::NotStarted { .. } | Self::NotReady { .. }
        )
    }

    #[inline]
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

impl fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lifecycle(err) => write!(f, "{err}"),
            Self::NotStarted { connector, phase } => {
                write!(f, "connector '{connector}' cannot be used while {phase}")
            }
            Self::NotReady { component, phase } => {
                write!(f, "'{component}' cannot be used while {phase}")
            }
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::Connection { resource, source } => {
                write!(f, "failed to connect '{resource}': {source}")
            }
            Self::PoolExhausted { key, max_active } => {
                write!(f, "pool exhausted for '{key}' (max active {max_active})")
            }
            Self::Rejected(err) => write!(f, "work rejected: {err}"),
            Self::Dispatch { endpoint, source } => {
                write!(f, "dispatch to '{endpoint}' failed: {source}")
            }
            Self::Request { endpoint, source } => {
                write!(f, "request from '{endpoint}' failed: {source}")
            }
            Self::Poll { receiver, source } => {
                write!(f, "poll on receiver '{receiver}' failed: {source}")
            }
            Self::Transport(err) => write!(f, "transport error: {err}"),
            Self::Disposed(name) => write!(f, "'{name}' is disposed"),
        }
    }
}

impl Error for ConnectorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Lifecycle(err) => Some(err),
            Self::Rejected(err) => Some(err),
            Self::Connection { source, .. }
            | Self::Dispatch { source, .. }
            | Self::Request { source, .. }
            | Self::Poll { source, .. } => Some(source.as_ref()),
            Self::Transport(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<LifecycleError> for ConnectorError {
    fn from(err: LifecycleError) -> Self {
        ConnectorError::Lifecycle(err)
    }
}

impl From<RejectedError> for ConnectorError {
    fn from(err: RejectedError) -> Self {
        ConnectorError::Rejected(err)
    }
}

impl From<anyhow::Error> for ConnectorError {
    fn from(err: anyhow::Error) -> Self {
        ConnectorError::Transport(err)
    }
}
