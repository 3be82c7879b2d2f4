pub use crate::config::ConnectorConfig;
pub use crate::connector::{
    Connector, ConnectorContext, DispatcherBackend, Endpoint, EndpointKey, ExceptionListener,
    ExchangePattern, FlowConstruct, LoggingExceptionListener, MessageDispatcher, MessageReceiver,
    MessageRequester, ReceiverBackend, ReceiverContext, RequesterBackend, Transport,
};
pub use crate::error::{ConnectorError, ConnectorResult, RejectReason, RejectedError};
pub use crate::lifecycle::{Connectable, Lifecycle, LifecyclePhase, TransportHooks};
pub use crate::message::{DefaultMessageFactory, Event, MessageFactory, MessageProcessor};
pub use crate::pool::{PoolConfig, PoolExhaustedAction};
pub use crate::threading::{ExhaustedAction, ThreadingProfile, WorkManager};
pub use crate::transport::{MemoryBroker, MemoryTransport};
pub use crate::utils::backoff::ReconnectCfg;
pub use crate::utils::logger::LoggerConfig;
pub use crate::utils::CancelToken;
