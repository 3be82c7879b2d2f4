use crate::connector::{Endpoint, EndpointKey, FlowConstruct, ReceiverContext};
use crate::lifecycle::TransportHooks;
use crate::message::{DefaultMessageFactory, Event, MessageFactory};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

/// A transport plugs protocol specifics into a [`Connector`](crate::connector::Connector).
///
/// The connector drives the [`TransportHooks`] of the transport itself
/// around its own lifecycle and asks it for one backend per pooled
/// dispatcher, pooled requester and registered receiver. All lifecycle
/// ordering and connection bookkeeping stays in the connector; backends only
/// do I/O.
pub trait Transport: TransportHooks {
    /// Lowercase protocol scheme, e.g. `"memory"`.
    fn protocol(&self) -> &str;

    fn create_dispatcher(&self, endpoint: &Endpoint) -> anyhow::Result<Box<dyn DispatcherBackend>>;

    fn create_requester(&self, endpoint: &Endpoint) -> anyhow::Result<Box<dyn RequesterBackend>>;

    fn create_receiver(
        &self,
        endpoint: &Endpoint,
        ctx: &ReceiverContext,
    ) -> anyhow::Result<Box<dyn ReceiverBackend>>;

    /// Registry key for a receiver; transports that multiplex several
    /// flows on one address can add a suffix here.
    fn receiver_key(&self, endpoint: &Endpoint, _flow: &FlowConstruct) -> EndpointKey {
        endpoint.key()
    }

    fn create_message_factory(&self, connector: &str) -> Arc<dyn MessageFactory> {
        Arc::new(DefaultMessageFactory::new(connector))
    }
}

/// Outbound I/O for one endpoint.
pub trait DispatcherBackend: TransportHooks {
    /// One-way send.
    fn do_dispatch(&self, event: Event) -> anyhow::Result<()>;

    /// Request-response send; `None` when the other side sent no reply.
    fn do_send(&self, event: Event) -> anyhow::Result<Option<Event>>;
}

/// Synchronous inbound read for one endpoint.
pub trait RequesterBackend: TransportHooks {
    /// Wait up to `timeout` for one message.
    fn do_request(&self, timeout: Duration) -> anyhow::Result<Option<Bytes>>;
}

/// Inbound side of one registered endpoint.
///
/// Push-style backends start their own delivery in `do_start`, holding on to
/// the [`ReceiverContext`] they were created with. Polling backends return a
/// `polling_interval` and get `poll` called on the connector's scheduler
/// while started.
pub trait ReceiverBackend: TransportHooks {
    fn polling_interval(&self) -> Option<Duration> {
        None
    }

    fn poll(&self, _ctx: &ReceiverContext) -> anyhow::Result<()> {
        Ok(())
    }
}
