use crate::connector::{Endpoint, EndpointKey, ExceptionListener, FlowConstruct, ReceiverBackend};
use crate::error::{ConnectorError, ConnectorResult};
use crate::lifecycle::{Connectable, Lifecycle, LifecycleState, TransportHandler};
use crate::message::{Event, MessageFactory, MessageProcessor};
use crate::threading::{ScheduledTask, Scheduler, WorkManager};
use crate::utils::HealthFlag;
use ahash::AHashMap;
use arc_swap::ArcSwapOption;
use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::fmt;
use std::sync::Arc;

/// What a receiver backend needs to hand inbound data to its flow.
#[derive(Clone)]
pub struct ReceiverContext {
    name: Arc<str>,
    endpoint: Endpoint,
    flow: FlowConstruct,
    listener: Arc<dyn MessageProcessor>,
    message_factory: Arc<dyn MessageFactory>,
    exception_listener: Arc<dyn ExceptionListener>,
    work_manager: Arc<ArcSwapOption<WorkManager>>,
}

impl ReceiverContext {
    pub(crate) fn new(
        endpoint: Endpoint,
        flow: FlowConstruct,
        listener: Arc<dyn MessageProcessor>,
        message_factory: Arc<dyn MessageFactory>,
        exception_listener: Arc<dyn ExceptionListener>,
        work_manager: Arc<ArcSwapOption<WorkManager>>,
    ) -> Self {
        let name = Arc::from(format!("receiver:{}", endpoint));
        Self {
            name,
            endpoint,
            flow,
            listener,
            message_factory,
            exception_listener,
            work_manager,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    #[inline]
    pub fn flow(&self) -> &FlowConstruct {
        &self.flow
    }

    #[inline]
    pub fn message_factory(&self) -> &Arc<dyn MessageFactory> {
        &self.message_factory
    }

    /// Event for raw inbound bytes, tagged with this endpoint.
    pub fn create_event(&self, payload: Bytes) -> Event {
        self.message_factory.create(payload, self.endpoint.address())
    }

    /// Deliver `event` to the flow on the calling thread and return its reply.
    pub fn route(&self, event: Event) -> anyhow::Result<Option<Event>> {
        self.listener.process(event)
    }

    /// Deliver `event` through the connector's receiver executor. Failures
    /// and rejections go to the exception listener. Without a running
    /// executor the event is routed on the calling thread.
    pub fn route_async(&self, event: Event) {
        let Some(wm) = self.work_manager.load_full() else {
            self.route_reporting(event);
            return;
        };
        let ctx = self.clone();
        if let Err(rejected) = wm.execute(move || ctx.route_reporting(event)) {
            self.report(&ConnectorError::Rejected(rejected));
        }
    }

    pub fn report(&self, err: &ConnectorError) {
        self.exception_listener.on_exception(&self.name, err);
    }

    fn route_reporting(&self, event: Event) {
        if let Err(source) = self.listener.process(event) {
            self.report(&ConnectorError::Poll {
                receiver: self.name.to_string(),
                source,
            });
        }
    }
}

impl fmt::Debug for ReceiverContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceiverContext")
            .field("endpoint", &self.endpoint.uri())
            .field("flow", &self.flow.name())
            .finish()
    }
}

struct ReceiverCore {
    handler: TransportHandler<dyn ReceiverBackend>,
    ctx: ReceiverContext,
    polling: HealthFlag,
}

impl ReceiverCore {
    fn poll_once(&self) {
        if !self.handler.lifecycle_state().is_started() || self.polling.swap(true) {
            return;
        }
        let _polling = PollingGuard(&self.polling);
        if let Err(source) = self.handler.backend().poll(&self.ctx) {
            self.ctx.report(&ConnectorError::Poll {
                receiver: self.ctx.name().to_string(),
                source,
            });
        }
    }
}

/// Clears the in-progress flag even when a poll panics.
struct PollingGuard<'a>(&'a HealthFlag);

impl Drop for PollingGuard<'_> {
    fn drop(&mut self) {
        self.0.down();
    }
}

/// Inbound component registered for one endpoint key.
///
/// Starting a polling receiver schedules its poll loop on the connector's
/// scheduler; stopping cancels it. A failing poll is reported and the loop
/// carries on with the next tick.
pub struct MessageReceiver {
    key: EndpointKey,
    core: Arc<ReceiverCore>,
    scheduler: Arc<ArcSwapOption<Scheduler>>,
    poll_task: Mutex<Option<ScheduledTask>>,
}

impl MessageReceiver {
    pub(crate) fn new(
        key: EndpointKey,
        ctx: ReceiverContext,
        backend: Box<dyn ReceiverBackend>,
        scheduler: Arc<ArcSwapOption<Scheduler>>,
    ) -> Self {
        let handler = TransportHandler::new(ctx.name().to_string(), backend);
        Self {
            key,
            core: Arc::new(ReceiverCore {
                handler,
                ctx,
                polling: HealthFlag::new(false),
            }),
            scheduler,
            poll_task: Mutex::new(None),
        }
    }

    #[inline]
    pub fn key(&self) -> &EndpointKey {
        &self.key
    }

    #[inline]
    pub fn endpoint(&self) -> &Endpoint {
        self.core.ctx.endpoint()
    }

    #[inline]
    pub fn flow(&self) -> &FlowConstruct {
        self.core.ctx.flow()
    }

    #[inline]
    pub fn context(&self) -> &ReceiverContext {
        &self.core.ctx
    }

    pub fn is_polling(&self) -> bool {
        self.poll_task.lock().is_some()
    }

    /// Run one poll right now, outside the schedule.
    pub fn poll_now(&self) {
        self.core.poll_once();
    }

    fn schedule_polling(&self) -> ConnectorResult<()> {
        let Some(interval) = self.core.handler.backend().polling_interval() else {
            return Ok(());
        };
        let Some(scheduler) = self.scheduler.load_full() else {
            tracing::warn!("[{}] no scheduler, polling not started", self.core.ctx.name());
            return Ok(());
        };
        let core = self.core.clone();
        let task = scheduler.schedule(move || core.poll_once(), interval, interval)?;
        *self.poll_task.lock() = Some(task);
        tracing::debug!("[{}] polling every {:?}", self.core.ctx.name(), interval);
        Ok(())
    }

    fn cancel_polling(&self) {
        if let Some(task) = self.poll_task.lock().take() {
            task.cancel();
        }
    }
}

impl Lifecycle for MessageReceiver {
    #[inline]
    fn lifecycle_state(&self) -> &LifecycleState {
        self.core.handler.lifecycle_state()
    }

    fn initialise(&self) -> ConnectorResult<()> {
        self.core.handler.initialise()
    }

    fn start(&self) -> ConnectorResult<()> {
        self.core.handler.start()?;
        self.schedule_polling()
    }

    fn stop(&self) -> ConnectorResult<()> {
        self.cancel_polling();
        self.core.handler.stop()
    }

    fn dispose(&self) -> ConnectorResult<()> {
        self.cancel_polling();
        self.core.handler.dispose()
    }
}

impl Connectable for MessageReceiver {
    fn connect(&self) -> ConnectorResult<()> {
        self.core.handler.connect()
    }

    fn disconnect(&self) -> ConnectorResult<()> {
        self.core.handler.disconnect()
    }

    #[inline]
    fn is_connected(&self) -> bool {
        self.core.handler.is_connected()
    }
}

impl fmt::Debug for MessageReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageReceiver")
            .field("key", &self.key)
            .field("flow", &self.flow().name())
            .field("handler", &self.core.handler)
            .finish()
    }
}

/// Receivers of one connector by key.
///
/// Reads take a shared lock; registration, unregistration and the
/// connector's own fan-out serialize on [`lock_registration`](Self::lock_registration).
#[derive(Default)]
pub struct ReceiverRegistry {
    receivers: RwLock<AHashMap<EndpointKey, Arc<MessageReceiver>>>,
    registration: Mutex<()>,
}

impl ReceiverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_registration(&self) -> MutexGuard<'_, ()> {
        self.registration.lock()
    }

    pub fn get(&self, key: &EndpointKey) -> Option<Arc<MessageReceiver>> {
        self.receivers.read().get(key).cloned()
    }

    pub fn insert(&self, receiver: Arc<MessageReceiver>) {
        self.receivers
            .write()
            .insert(receiver.key().clone(), receiver);
    }

    pub fn remove(&self, key: &EndpointKey) -> Option<Arc<MessageReceiver>> {
        self.receivers.write().remove(key)
    }

    pub fn snapshot(&self) -> Vec<Arc<MessageReceiver>> {
        self.receivers.read().values().cloned().collect()
    }

    pub fn for_flow(&self, flow: &FlowConstruct) -> Vec<Arc<MessageReceiver>> {
        self.receivers
            .read()
            .values()
            .filter(|r| r.flow() == flow)
            .cloned()
            .collect()
    }

    pub fn drain(&self) -> Vec<Arc<MessageReceiver>> {
        self.receivers.write().drain().map(|(_, r)| r).collect()
    }

    pub fn len(&self) -> usize {
        self.receivers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.receivers.read().is_empty()
    }
}

impl fmt::Debug for ReceiverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<_> = self.receivers.read().keys().cloned().collect();
        f.debug_struct("ReceiverRegistry").field("keys", &keys).finish()
    }
}
