use crate::config::ConnectorConfig;
use crate::connector::{
    ConnectorContext, DispatcherFactory, Endpoint, EndpointKey, ExchangePattern, FlowConstruct,
    MessageDispatcher, MessageReceiver, MessageRequester, ReceiverContext, ReceiverRegistry,
    RequesterFactory, Transport,
};
use crate::error::{ConnectorError, ConnectorResult, RejectReason, RejectedError};
use crate::lifecycle::{
    Connectable, Lifecycle, LifecyclePhase, LifecycleState, Transition, activate, passivate,
    teardown,
};
use crate::message::{Event, MessageFactory, MessageProcessor};
use crate::pool::{KeyedPool, PoolConfig};
use crate::threading::{ExhaustedAction, Scheduler, ThreadingProfile, WorkManager};
use crate::utils::backoff::{ReconnectCfg, retry};
use crate::utils::{CancelToken, HealthFlag};
use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

pub type DispatcherPool = KeyedPool<Endpoint, MessageDispatcher>;
pub type RequesterPool = KeyedPool<Endpoint, MessageRequester>;

/// Orchestrates one transport: its receivers, the dispatcher and requester
/// pools, and the executors and scheduler that only exist while started.
///
/// Lifecycle: exactly one `initialise` and one `dispose`; `start`/`stop`
/// alternate freely in between. Every transition is guarded by the
/// connector's [`LifecycleState`], so concurrent callers race safely and the
/// losers get an illegal-transition error.
///
/// While stopped the three work managers and the scheduler are unset and
/// both pools are empty; `start` rebuilds them from the threading profiles.
/// Registered receivers survive `stop`/`start` cycles and are only dropped
/// by `unregister_listener` or `dispose`.
pub struct Connector<T: Transport> {
    name: String,
    transport: Arc<T>,
    state: Arc<LifecycleState>,
    ctx: ConnectorContext,
    cancel: CancelToken,

    dispatcher_profile: ThreadingProfile,
    requester_profile: ThreadingProfile,
    receiver_profile: ThreadingProfile,
    dispatcher_pool_cfg: PoolConfig,
    requester_pool_cfg: PoolConfig,
    reconnect: Option<ReconnectCfg>,

    connected: HealthFlag,
    connect_lock: Mutex<()>,

    receivers: ReceiverRegistry,
    dispatchers: OnceLock<Arc<DispatcherPool>>,
    requesters: OnceLock<Arc<RequesterPool>>,
    dispatcher_factory: OnceLock<DispatcherFactory<T>>,
    requester_factory: OnceLock<RequesterFactory<T>>,
    message_factory: OnceLock<Arc<dyn MessageFactory>>,

    receiver_wm: Arc<ArcSwapOption<WorkManager>>,
    dispatcher_wm: ArcSwapOption<WorkManager>,
    requester_wm: ArcSwapOption<WorkManager>,
    scheduler: Arc<ArcSwapOption<Scheduler>>,
}

impl<T: Transport> Connector<T> {
    pub fn new(transport: T) -> Self {
        Self::with_context(transport, ConnectorContext::default())
    }

    pub fn with_context(transport: T, ctx: ConnectorContext) -> Self {
        let name = transport.protocol().to_ascii_lowercase();
        let cancel = ctx.cancel_token().new_child();
        Self {
            state: Arc::new(LifecycleState::new(name.clone())),
            name,
            transport: Arc::new(transport),
            ctx,
            cancel,
            dispatcher_profile: ThreadingProfile::default(),
            requester_profile: ThreadingProfile::default(),
            receiver_profile: ThreadingProfile::default(),
            dispatcher_pool_cfg: PoolConfig::default(),
            requester_pool_cfg: PoolConfig::default(),
            reconnect: None,
            connected: HealthFlag::new(false),
            connect_lock: Mutex::new(()),
            receivers: ReceiverRegistry::new(),
            dispatchers: OnceLock::new(),
            requesters: OnceLock::new(),
            dispatcher_factory: OnceLock::new(),
            requester_factory: OnceLock::new(),
            message_factory: OnceLock::new(),
            receiver_wm: Arc::new(ArcSwapOption::empty()),
            dispatcher_wm: ArcSwapOption::empty(),
            requester_wm: ArcSwapOption::empty(),
            scheduler: Arc::new(ArcSwapOption::empty()),
        }
    }

    pub fn from_config(
        cfg: ConnectorConfig,
        transport: T,
        ctx: ConnectorContext,
    ) -> ConnectorResult<Self> {
        let ctx = match cfg.shutdown_timeout() {
            Some(timeout) => ctx.with_shutdown_timeout(timeout),
            None => ctx,
        };
        let mut connector = Self::with_context(transport, ctx)
            .with_dispatcher_threading_profile(cfg.dispatcher_threading)
            .with_requester_threading_profile(cfg.requester_threading)
            .with_receiver_threading_profile(cfg.receiver_threading)
            .with_dispatcher_pool_config(cfg.dispatcher_pool)
            .with_requester_pool_config(cfg.requester_pool);
        if let Some(reconnect) = cfg.reconnect {
            connector = connector.with_reconnect(reconnect);
        }
        if let Some(name) = cfg.name {
            connector.set_name(name)?;
        }
        Ok(connector)
    }

    pub fn with_dispatcher_threading_profile(mut self, profile: ThreadingProfile) -> Self {
        self.dispatcher_profile = profile;
        self
    }

    pub fn with_requester_threading_profile(mut self, profile: ThreadingProfile) -> Self {
        self.requester_profile = profile;
        self
    }

    pub fn with_receiver_threading_profile(mut self, profile: ThreadingProfile) -> Self {
        self.receiver_profile = profile;
        self
    }

    pub fn with_dispatcher_pool_config(mut self, cfg: PoolConfig) -> Self {
        self.dispatcher_pool_cfg = cfg;
        self
    }

    pub fn with_requester_pool_config(mut self, cfg: PoolConfig) -> Self {
        self.requester_pool_cfg = cfg;
        self
    }

    pub fn with_reconnect(mut self, cfg: ReconnectCfg) -> Self {
        self.reconnect = Some(cfg);
        self
    }

    /// Rename the connector. Only possible before `initialise`, since pools
    /// and executors carry the name.
    pub fn set_name(&mut self, name: impl Into<String>) -> ConnectorResult<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ConnectorError::invalid("connector name must not be empty"));
        }
        if self.state.phase() != LifecyclePhase::Uninitialised {
            return Err(ConnectorError::invalid(format!(
                "cannot rename connector '{}' while {}",
                self.name,
                self.state.phase()
            )));
        }
        self.state = Arc::new(LifecycleState::new(name.clone()));
        self.name = name;
        Ok(())
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn protocol(&self) -> &str {
        self.transport.protocol()
    }

    #[inline]
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    #[inline]
    pub fn context(&self) -> &ConnectorContext {
        &self.ctx
    }

    #[inline]
    pub fn dispatcher_threading_profile(&self) -> &ThreadingProfile {
        &self.dispatcher_profile
    }

    #[inline]
    pub fn requester_threading_profile(&self) -> &ThreadingProfile {
        &self.requester_profile
    }

    #[inline]
    pub fn receiver_threading_profile(&self) -> &ThreadingProfile {
        &self.receiver_profile
    }

    pub fn receiver_work_manager(&self) -> Option<Arc<WorkManager>> {
        self.receiver_wm.load_full()
    }

    pub fn dispatcher_work_manager(&self) -> Option<Arc<WorkManager>> {
        self.dispatcher_wm.load_full()
    }

    pub fn requester_work_manager(&self) -> Option<Arc<WorkManager>> {
        self.requester_wm.load_full()
    }

    pub fn scheduler(&self) -> Option<Arc<Scheduler>> {
        self.scheduler.load_full()
    }

    pub fn dispatcher_pool(&self) -> Option<&Arc<DispatcherPool>> {
        self.dispatchers.get()
    }

    pub fn requester_pool(&self) -> Option<&Arc<RequesterPool>> {
        self.requesters.get()
    }

    pub fn dispatcher_factory(&self) -> Option<&DispatcherFactory<T>> {
        self.dispatcher_factory.get()
    }

    pub fn requester_factory(&self) -> Option<&RequesterFactory<T>> {
        self.requester_factory.get()
    }

    /// Factory for events built from raw transport data; set by `initialise`.
    pub fn create_message_factory(&self) -> Option<Arc<dyn MessageFactory>> {
        self.message_factory.get().cloned()
    }

    // --- receivers ---

    /// Register `listener` for inbound messages on `endpoint`.
    ///
    /// A new receiver is initialised right away, and connected and started
    /// when the connector is (or is becoming) started. Registering a key that
    /// already has a receiver returns that receiver unchanged.
    pub fn register_listener(
        &self,
        endpoint: &Endpoint,
        listener: Arc<dyn MessageProcessor>,
        flow: &FlowConstruct,
    ) -> ConnectorResult<Arc<MessageReceiver>> {
        self.check_endpoint(endpoint)?;
        self.ensure_not_disposed()?;

        let _reg = self.receivers.lock_registration();
        let key = self.transport.receiver_key(endpoint, flow);
        if let Some(existing) = self.receivers.get(&key) {
            tracing::debug!("[Connector:{}] receiver {} already registered", self.name, key);
            return Ok(existing);
        }

        let message_factory = self
            .message_factory
            .get()
            .cloned()
            .unwrap_or_else(|| self.transport.create_message_factory(&self.name));
        let ctx = ReceiverContext::new(
            endpoint.clone(),
            flow.clone(),
            listener,
            message_factory,
            self.ctx.exception_listener().clone(),
            self.receiver_wm.clone(),
        );
        let backend = self.transport.create_receiver(endpoint, &ctx)?;
        let receiver = Arc::new(MessageReceiver::new(
            key,
            ctx,
            backend,
            self.scheduler.clone(),
        ));
        if let Err(err) = receiver.initialise() {
            teardown(&*receiver);
            return Err(err);
        }
        self.receivers.insert(receiver.clone());
        tracing::debug!(
            "[Connector:{}] registered receiver {} for flow {}",
            self.name,
            receiver.key(),
            flow.name()
        );

        if matches!(
            self.state.phase(),
            LifecyclePhase::Starting | LifecyclePhase::Started
        ) {
            activate(&*receiver)?;
        }
        Ok(receiver)
    }

    /// Stop, disconnect, dispose and forget the receiver for `endpoint`.
    /// Returns false when nothing was registered under its key.
    pub fn unregister_listener(
        &self,
        endpoint: &Endpoint,
        flow: &FlowConstruct,
    ) -> ConnectorResult<bool> {
        self.check_endpoint(endpoint)?;
        let _reg = self.receivers.lock_registration();
        let key = self.transport.receiver_key(endpoint, flow);
        match self.receivers.remove(&key) {
            Some(receiver) => {
                teardown(&*receiver);
                tracing::debug!("[Connector:{}] unregistered receiver {}", self.name, key);
                Ok(true)
            }
            None => {
                tracing::debug!("[Connector:{}] no receiver registered for {}", self.name, key);
                Ok(false)
            }
        }
    }

    /// Unregister every receiver delivering to `flow`, e.g. when the flow stops.
    pub fn unregister_flow(&self, flow: &FlowConstruct) -> usize {
        let _reg = self.receivers.lock_registration();
        let mut removed = 0;
        for receiver in self.receivers.for_flow(flow) {
            if self.receivers.remove(receiver.key()).is_some() {
                teardown(&*receiver);
                removed += 1;
            }
        }
        removed
    }

    pub fn lookup_receiver(&self, key: &EndpointKey) -> Option<Arc<MessageReceiver>> {
        self.receivers.get(key)
    }

    pub fn receivers(&self) -> Vec<Arc<MessageReceiver>> {
        self.receivers.snapshot()
    }

    pub fn receivers_for_flow(&self, flow: &FlowConstruct) -> Vec<Arc<MessageReceiver>> {
        self.receivers.for_flow(flow)
    }

    #[inline]
    pub fn receiver_count(&self) -> usize {
        self.receivers.len()
    }

    // --- outbound ---

    /// Send `event` to `endpoint` through a pooled dispatcher.
    ///
    /// Request-response endpoints are served on the calling thread and
    /// return the reply. One-way sends go through the dispatcher executor and
    /// return `None` once submitted; their failures go to the exception
    /// listener. A saturated executor resolves per its exhausted action:
    /// aborts surface as `Rejected`, wait timeouts are reported to the
    /// exception listener and swallowed.
    pub fn dispatch(&self, endpoint: &Endpoint, event: Event) -> ConnectorResult<Option<Event>> {
        self.ensure_started()?;
        self.check_endpoint(endpoint)?;
        let pool = self.pool(&self.dispatchers)?;

        if endpoint.exchange_pattern() == ExchangePattern::RequestResponse {
            return send_through(&pool, endpoint, event);
        }
        let Some(wm) = self.dispatcher_wm.load_full() else {
            return send_through(&pool, endpoint, event);
        };

        let listener = self.ctx.exception_listener().clone();
        let source = format!("Connector:{}", self.name);
        let ep = endpoint.clone();
        let submitted = wm.execute(move || {
            if let Err(err) = send_through(&pool, &ep, event) {
                listener.on_exception(&source, &err);
            }
        });
        self.resolve_rejection(submitted).map(|()| None)
    }

    /// Read one message from `endpoint` through a pooled requester, waiting
    /// up to `timeout`. `None` when nothing arrived in time.
    pub fn request(&self, endpoint: &Endpoint, timeout: Duration) -> ConnectorResult<Option<Event>> {
        self.ensure_started()?;
        self.check_endpoint(endpoint)?;
        let pool = self.pool(&self.requesters)?;
        request_through(&pool, endpoint, timeout)
    }

    /// [`request`](Self::request) on the requester executor; `on_reply` gets
    /// the outcome on the worker thread.
    pub fn request_async<F>(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
        on_reply: F,
    ) -> ConnectorResult<()>
    where
        F: FnOnce(ConnectorResult<Option<Event>>) + Send + 'static,
    {
        self.ensure_started()?;
        self.check_endpoint(endpoint)?;
        let pool = self.pool(&self.requesters)?;
        let Some(wm) = self.requester_wm.load_full() else {
            on_reply(request_through(&pool, endpoint, timeout));
            return Ok(());
        };
        let ep = endpoint.clone();
        let submitted = wm.execute(move || on_reply(request_through(&pool, &ep, timeout)));
        self.resolve_rejection(submitted)
    }

    /// Dispose every pooled dispatcher for `endpoint`.
    pub fn clear_dispatchers_for(&self, endpoint: &Endpoint) {
        if let Some(pool) = self.dispatchers.get() {
            pool.clear_key(endpoint);
        }
    }

    // --- internals ---

    fn ensure_started(&self) -> ConnectorResult<()> {
        let phase = self.state.phase();
        if phase == LifecyclePhase::Started {
            Ok(())
        } else {
            Err(ConnectorError::NotStarted {
                connector: self.name.clone(),
                phase,
            })
        }
    }

    fn ensure_not_disposed(&self) -> ConnectorResult<()> {
        match self.state.phase() {
            LifecyclePhase::Disposing | LifecyclePhase::Disposed => {
                Err(ConnectorError::Disposed(self.name.clone()))
            }
            _ => Ok(()),
        }
    }

    fn check_endpoint(&self, endpoint: &Endpoint) -> ConnectorResult<()> {
        if endpoint.address().is_empty() {
            return Err(ConnectorError::invalid(format!(
                "endpoint '{}' has no address",
                endpoint.name()
            )));
        }
        if !endpoint.protocol().eq_ignore_ascii_case(self.protocol()) {
            return Err(ConnectorError::invalid(format!(
                "endpoint {} does not match connector '{}' protocol '{}'",
                endpoint,
                self.name,
                self.protocol()
            )));
        }
        Ok(())
    }

    fn pool<P>(&self, slot: &OnceLock<Arc<P>>) -> ConnectorResult<Arc<P>> {
        slot.get().cloned().ok_or_else(|| ConnectorError::NotStarted {
            connector: self.name.clone(),
            phase: self.state.phase(),
        })
    }

    fn resolve_rejection(&self, submitted: Result<(), RejectedError>) -> ConnectorResult<()> {
        let Err(rejected) = submitted else {
            return Ok(());
        };
        match rejected.reason {
            RejectReason::WaitTimeout | RejectReason::Discarded => {
                let err = ConnectorError::Rejected(rejected);
                self.ctx
                    .exception_listener()
                    .on_exception(&format!("Connector:{}", self.name), &err);
                Ok(())
            }
            RejectReason::Aborted | RejectReason::Shutdown => Err(ConnectorError::Rejected(rejected)),
        }
    }

    /// Max dispatchers per endpoint follows the dispatcher profile, plus one
    /// for the caller thread when saturation runs work in place.
    fn resolved_dispatcher_pool_config(&self) -> PoolConfig {
        let mut cfg = self.dispatcher_pool_cfg.clone();
        if cfg.max_active_per_key.is_none() {
            let mut max = self.dispatcher_profile.max_threads_active();
            if self.dispatcher_profile.exhausted_action() == ExhaustedAction::Run {
                max += 1;
            }
            cfg.max_active_per_key = Some(max);
        }
        cfg
    }

    fn resolved_requester_pool_config(&self) -> PoolConfig {
        let mut cfg = self.requester_pool_cfg.clone();
        if cfg.max_active_per_key.is_none() {
            cfg.max_active_per_key = Some(self.requester_profile.max_threads_active());
        }
        cfg
    }

    fn create_executors(&self) {
        let name = &self.name;
        self.receiver_wm.store(Some(Arc::new(
            self.receiver_profile
                .create_work_manager(&format!("{name}.receiver")),
        )));
        self.dispatcher_wm.store(Some(Arc::new(
            self.dispatcher_profile
                .create_work_manager(&format!("{name}.dispatcher")),
        )));
        self.requester_wm.store(Some(Arc::new(
            self.requester_profile
                .create_work_manager(&format!("{name}.requester")),
        )));
        self.scheduler.store(Some(Arc::new(Scheduler::new(
            format!("{name}.scheduler"),
            &self.cancel,
        ))));
    }

    fn dispose_executors(&self) {
        let timeout = self.ctx.shutdown_timeout();
        if let Some(scheduler) = self.scheduler.swap(None) {
            scheduler.shutdown();
            if !scheduler.await_termination(timeout) {
                tracing::warn!(
                    "[Connector:{}] scheduler still running after {:?}",
                    self.name,
                    timeout
                );
            }
        }
        for slot in [&*self.receiver_wm, &self.dispatcher_wm, &self.requester_wm] {
            if let Some(wm) = slot.swap(None) {
                wm.dispose(timeout);
            }
        }
    }

    fn clear_pools(&self) {
        if let Some(pool) = self.dispatchers.get() {
            pool.clear();
        }
        if let Some(pool) = self.requesters.get() {
            pool.clear();
        }
    }

    fn connect_transport(&self) -> ConnectorResult<()> {
        let _guard = self.connect_lock.lock();
        if self.connected.get() {
            return Ok(());
        }
        let res = match &self.reconnect {
            Some(cfg) => retry(cfg, &self.cancel, |attempt| {
                if attempt > 0 {
                    tracing::info!("[Connector:{}] reconnect attempt {}", self.name, attempt);
                }
                self.transport.do_connect()
            }),
            None => self.transport.do_connect(),
        };
        res.map_err(|err| ConnectorError::connection(self.name.clone(), err))?;
        self.connected.up();
        tracing::info!("[Connector:{}] connected", self.name);
        Ok(())
    }

    fn disconnect_transport(&self) -> ConnectorResult<()> {
        let _guard = self.connect_lock.lock();
        if !self.connected.swap(false) {
            return Ok(());
        }
        tracing::info!("[Connector:{}] disconnected", self.name);
        self.transport
            .do_disconnect()
            .map_err(|err| ConnectorError::connection(self.name.clone(), err))
    }
}

fn send_through(
    pool: &Arc<DispatcherPool>,
    endpoint: &Endpoint,
    event: Event,
) -> ConnectorResult<Option<Event>> {
    let dispatcher = pool.borrow(endpoint)?;
    match dispatcher.process(event) {
        Ok(reply) => Ok(reply),
        Err(err) => {
            if !dispatcher.is_connected() {
                dispatcher.invalidate();
            }
            Err(err)
        }
    }
}

fn request_through(
    pool: &Arc<RequesterPool>,
    endpoint: &Endpoint,
    timeout: Duration,
) -> ConnectorResult<Option<Event>> {
    let requester = pool.borrow(endpoint)?;
    match requester.request(timeout) {
        Ok(event) => Ok(event),
        Err(err) => {
            if !requester.is_connected() {
                requester.invalidate();
            }
            Err(err)
        }
    }
}

fn keep_first(slot: &mut Option<ConnectorError>, res: ConnectorResult<()>) {
    if let Err(err) = res
        && slot.is_none()
    {
        *slot = Some(err);
    }
}

impl<T: Transport> Lifecycle for Connector<T> {
    #[inline]
    fn lifecycle_state(&self) -> &LifecycleState {
        &self.state
    }

    fn initialise(&self) -> ConnectorResult<()> {
        self.state.run(Transition::Initialise, || {
            tracing::info!("[Connector:{}] initialising", self.name);

            let message_factory = self.transport.create_message_factory(&self.name);
            let dispatcher_factory = DispatcherFactory::new(self.transport.clone());
            let requester_factory =
                RequesterFactory::new(self.transport.clone(), message_factory.clone());

            let df = dispatcher_factory.clone();
            let dispatchers = KeyedPool::new(
                format!("{}.dispatchers", self.name),
                self.resolved_dispatcher_pool_config(),
                self.state.clone(),
                move |endpoint: &Endpoint| df.create(endpoint),
            );
            let rf = requester_factory.clone();
            let requesters = KeyedPool::new(
                format!("{}.requesters", self.name),
                self.resolved_requester_pool_config(),
                self.state.clone(),
                move |endpoint: &Endpoint| rf.create(endpoint),
            );

            // initialise runs once, so these slots are always empty here
            let _ = self.dispatchers.set(Arc::new(dispatchers));
            let _ = self.requesters.set(Arc::new(requesters));
            let _ = self.dispatcher_factory.set(dispatcher_factory);
            let _ = self.requester_factory.set(requester_factory);
            let _ = self.message_factory.set(message_factory);

            self.transport.do_initialise()?;
            tracing::info!("[Connector:{}] initialised", self.name);
            Ok(())
        })
    }

    fn start(&self) -> ConnectorResult<()> {
        self.state.run(Transition::Start, || {
            tracing::info!("[Connector:{}] starting", self.name);
            self.create_executors();
            self.connect_transport()?;
            self.transport.do_start()?;

            let mut first_err = None;
            {
                let _reg = self.receivers.lock_registration();
                for receiver in self.receivers.snapshot() {
                    let res = activate(&*receiver);
                    if let Err(err) = &res {
                        tracing::warn!(
                            "[Connector:{}] failed to start receiver {}: {}",
                            self.name,
                            receiver.key(),
                            err
                        );
                    }
                    keep_first(&mut first_err, res);
                }
            }
            if let Some(pool) = self.dispatchers.get() {
                keep_first(&mut first_err, pool.apply_start());
            }
            if let Some(pool) = self.requesters.get() {
                keep_first(&mut first_err, pool.apply_start());
            }

            match first_err {
                Some(err) => Err(err),
                None => {
                    tracing::info!("[Connector:{}] started", self.name);
                    Ok(())
                }
            }
        })
    }

    fn stop(&self) -> ConnectorResult<()> {
        self.state.run(Transition::Stop, || {
            tracing::info!("[Connector:{}] stopping", self.name);
            let mut first_err = None;

            if let Some(scheduler) = self.scheduler.load_full() {
                scheduler.shutdown();
            }
            {
                let _reg = self.receivers.lock_registration();
                for receiver in self.receivers.snapshot() {
                    let res = passivate(&*receiver);
                    if let Err(err) = &res {
                        tracing::warn!(
                            "[Connector:{}] failed to stop receiver {}: {}",
                            self.name,
                            receiver.key(),
                            err
                        );
                    }
                    keep_first(&mut first_err, res);
                }
            }
            keep_first(
                &mut first_err,
                self.transport.do_stop().map_err(ConnectorError::Transport),
            );

            // in-flight work drains before the pools it borrows from are cleared
            self.dispose_executors();
            self.clear_pools();
            keep_first(&mut first_err, self.disconnect_transport());

            match first_err {
                Some(err) => Err(err),
                None => {
                    tracing::info!("[Connector:{}] stopped", self.name);
                    Ok(())
                }
            }
        })
    }

    fn dispose(&self) -> ConnectorResult<()> {
        self.state.check(Transition::Dispose)?;
        if self.state.is_started()
            && let Err(err) = self.stop()
        {
            tracing::warn!("[Connector:{}] stop before dispose failed: {}", self.name, err);
        }

        self.state.run(Transition::Dispose, || {
            tracing::info!("[Connector:{}] disposing", self.name);
            {
                let _reg = self.receivers.lock_registration();
                for receiver in self.receivers.drain() {
                    teardown(&*receiver);
                }
            }
            self.dispose_executors();
            self.clear_pools();
            if let Err(err) = self.disconnect_transport() {
                tracing::warn!("[Connector:{}] disconnect on dispose failed: {}", self.name, err);
            }
            self.transport.do_dispose();
            self.cancel.cancel();
            tracing::info!("[Connector:{}] disposed", self.name);
            Ok(())
        })
    }
}

impl<T: Transport> Connectable for Connector<T> {
    /// Connect the transport and every registered receiver; receivers are
    /// started too when the connector is started.
    fn connect(&self) -> ConnectorResult<()> {
        self.ensure_not_disposed()?;
        self.connect_transport()?;
        let started = self.state.is_started();
        let _reg = self.receivers.lock_registration();
        for receiver in self.receivers.snapshot() {
            if started {
                activate(&*receiver)?;
            } else {
                receiver.connect()?;
            }
        }
        Ok(())
    }

    /// A started connector is stopped, which disconnects everything.
    /// Otherwise receivers and the transport are disconnected directly.
    fn disconnect(&self) -> ConnectorResult<()> {
        if self.state.is_started() {
            return self.stop();
        }
        let mut first_err = None;
        {
            let _reg = self.receivers.lock_registration();
            for receiver in self.receivers.snapshot() {
                keep_first(&mut first_err, receiver.disconnect());
            }
        }
        keep_first(&mut first_err, self.disconnect_transport());
        first_err.map_or(Ok(()), Err)
    }

    #[inline]
    fn is_connected(&self) -> bool {
        self.connected.get()
    }
}

impl<T: Transport> Drop for Connector<T> {
    fn drop(&mut self) {
        match self.state.phase() {
            LifecyclePhase::Uninitialised | LifecyclePhase::Disposed => {}
            phase => {
                tracing::debug!("[Connector:{}] dropped while {}, disposing", self.name, phase);
                if let Err(err) = self.dispose() {
                    tracing::warn!("[Connector:{}] dispose on drop failed: {}", self.name, err);
                }
            }
        }
    }
}

impl<T: Transport> fmt::Debug for Connector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("name", &self.name)
            .field("protocol", &self.protocol())
            .field("phase", &self.state.phase())
            .field("connected", &self.connected.get())
            .field("receivers", &self.receivers)
            .finish()
    }
}
