use crate::connector::{DispatcherBackend, Endpoint, ExchangePattern, RequesterBackend, Transport};
use crate::error::{ConnectorError, ConnectorResult};
use crate::lifecycle::{Connectable, Lifecycle, LifecycleState, TransportHandler};
use crate::message::{Event, MessageFactory};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Implements [`Lifecycle`] and [`Connectable`] by forwarding to a
/// `handler: TransportHandler<_>` field.
macro_rules! delegate_to_handler {
    ($ty:ty) => {
        impl Lifecycle for $ty {
            #[inline]
            fn lifecycle_state(&self) -> &LifecycleState {
                self.handler.lifecycle_state()
            }

            fn initialise(&self) -> ConnectorResult<()> {
                self.handler.initialise()
            }

            fn start(&self) -> ConnectorResult<()> {
                self.handler.start()
            }

            fn stop(&self) -> ConnectorResult<()> {
                self.handler.stop()
            }

            fn dispose(&self) -> ConnectorResult<()> {
                self.handler.dispose()
            }
        }

        impl Connectable for $ty {
            fn connect(&self) -> ConnectorResult<()> {
                self.handler.connect()
            }

            fn disconnect(&self) -> ConnectorResult<()> {
                self.handler.disconnect()
            }

            #[inline]
            fn is_connected(&self) -> bool {
                self.handler.is_connected()
            }
        }
    };
}

fn ensure_started<T: Lifecycle + ?Sized>(obj: &T) -> ConnectorResult<()> {
    let state = obj.lifecycle_state();
    if state.is_started() {
        Ok(())
    } else {
        Err(ConnectorError::NotReady {
            component: state.name().to_string(),
            phase: state.phase(),
        })
    }
}

/// Pooled outbound component bound to one endpoint.
pub struct MessageDispatcher {
    endpoint: Endpoint,
    handler: TransportHandler<dyn DispatcherBackend>,
}

delegate_to_handler!(MessageDispatcher);

impl MessageDispatcher {
    pub fn new(endpoint: Endpoint, backend: Box<dyn DispatcherBackend>) -> Self {
        let name = format!("dispatcher:{}", endpoint);
        Self {
            endpoint,
            handler: TransportHandler::new(name, backend),
        }
    }

    #[inline]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Send `event` following the endpoint's exchange pattern. One-way
    /// sends always yield `None`.
    pub fn process(&self, event: Event) -> ConnectorResult<Option<Event>> {
        ensure_started(self)?;
        let backend = self.handler.backend();
        let res = match self.endpoint.exchange_pattern() {
            ExchangePattern::OneWay => backend.do_dispatch(event).map(|()| None),
            ExchangePattern::RequestResponse => backend.do_send(event),
        };
        res.map_err(|source| ConnectorError::Dispatch {
            endpoint: self.endpoint.uri(),
            source,
        })
    }
}

impl fmt::Debug for MessageDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageDispatcher")
            .field("endpoint", &self.endpoint.uri())
            .field("handler", &self.handler)
            .finish()
    }
}

/// Pooled synchronous reader bound to one endpoint.
pub struct MessageRequester {
    endpoint: Endpoint,
    factory: Arc<dyn MessageFactory>,
    handler: TransportHandler<dyn RequesterBackend>,
}

delegate_to_handler!(MessageRequester);

impl MessageRequester {
    pub fn new(
        endpoint: Endpoint,
        factory: Arc<dyn MessageFactory>,
        backend: Box<dyn RequesterBackend>,
    ) -> Self {
        let name = format!("requester:{}", endpoint);
        Self {
            endpoint,
            factory,
            handler: TransportHandler::new(name, backend),
        }
    }

    #[inline]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Wait up to `timeout` for one message; `None` on timeout.
    pub fn request(&self, timeout: Duration) -> ConnectorResult<Option<Event>> {
        ensure_started(self)?;
        let payload = self
            .handler
            .backend()
            .do_request(timeout)
            .map_err(|source| ConnectorError::Request {
                endpoint: self.endpoint.uri(),
                source,
            })?;
        Ok(payload.map(|p| self.factory.create(p, self.endpoint.address())))
    }
}

impl fmt::Debug for MessageRequester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageRequester")
            .field("endpoint", &self.endpoint.uri())
            .field("handler", &self.handler)
            .finish()
    }
}

/// Builds dispatchers for the dispatcher pool.
pub struct DispatcherFactory<T: Transport> {
    transport: Arc<T>,
}

impl<T: Transport> DispatcherFactory<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    pub fn create(&self, endpoint: &Endpoint) -> ConnectorResult<MessageDispatcher> {
        let backend = self.transport.create_dispatcher(endpoint)?;
        Ok(MessageDispatcher::new(endpoint.clone(), backend))
    }
}

impl<T: Transport> Clone for DispatcherFactory<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
        }
    }
}

/// Builds requesters for the requester pool.
pub struct RequesterFactory<T: Transport> {
    transport: Arc<T>,
    message_factory: Arc<dyn MessageFactory>,
}

impl<T: Transport> RequesterFactory<T> {
    pub fn new(transport: Arc<T>, message_factory: Arc<dyn MessageFactory>) -> Self {
        Self {
            transport,
            message_factory,
        }
    }

    pub fn create(&self, endpoint: &Endpoint) -> ConnectorResult<MessageRequester> {
        let backend = self.transport.create_requester(endpoint)?;
        Ok(MessageRequester::new(
            endpoint.clone(),
            self.message_factory.clone(),
            backend,
        ))
    }
}

impl<T: Transport> Clone for RequesterFactory<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            message_factory: self.message_factory.clone(),
        }
    }
}
