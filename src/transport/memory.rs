use crate::connector::{
    DispatcherBackend, Endpoint, ExchangePattern, ReceiverBackend, ReceiverContext,
    RequesterBackend, Transport,
};
use crate::lifecycle::TransportHooks;
use crate::message::Event;
use ahash::AHashMap;
use anyhow::anyhow;
use bytes::Bytes;
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

pub const MEMORY_PROTOCOL: &str = "memory";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);
const POLL_BATCH: usize = 64;

/// In-process queues keyed by endpoint address.
///
/// One-way sends land in the address queue; request-response sends go
/// straight to the receiver registered as responder for the address.
#[derive(Default)]
pub struct MemoryBroker {
    queues: Mutex<AHashMap<String, VecDeque<Bytes>>>,
    arrived: Condvar,
    responders: RwLock<AHashMap<String, ReceiverContext>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, address: &str, payload: Bytes) {
        self.queues
            .lock()
            .entry(address.to_string())
            .or_default()
            .push_back(payload);
        self.arrived.notify_all();
    }

    pub fn try_pop(&self, address: &str) -> Option<Bytes> {
        self.queues.lock().get_mut(address)?.pop_front()
    }

    /// Wait up to `timeout` for a message on `address`.
    pub fn pop(&self, address: &str, timeout: Duration) -> Option<Bytes> {
        let deadline = Instant::now() + timeout;
        let mut queues = self.queues.lock();
        loop {
            if let Some(payload) = queues.get_mut(address).and_then(VecDeque::pop_front) {
                return Some(payload);
            }
            if self.arrived.wait_until(&mut queues, deadline).timed_out() {
                return queues.get_mut(address).and_then(VecDeque::pop_front);
            }
        }
    }

    pub fn drain(&self, address: &str, max: usize) -> Vec<Bytes> {
        let mut queues = self.queues.lock();
        match queues.get_mut(address) {
            Some(queue) => {
                let n = max.min(queue.len());
                queue.drain(..n).collect()
            }
            None => Vec::new(),
        }
    }

    pub fn depth(&self, address: &str) -> usize {
        self.queues.lock().get(address).map_or(0, VecDeque::len)
    }

    fn set_responder(&self, address: &str, ctx: ReceiverContext) {
        self.responders.write().insert(address.to_string(), ctx);
    }

    fn clear_responder(&self, address: &str) {
        self.responders.write().remove(address);
    }

    fn responder(&self, address: &str) -> Option<ReceiverContext> {
        self.responders.read().get(address).cloned()
    }
}

#[derive(Debug, Copy, Clone)]
enum Hook {
    Initialise,
    Connect,
    Disconnect,
    Start,
    Stop,
    Dispose,
}

/// Hook invocations of one kind of component.
#[derive(Debug, Default)]
pub struct LifecycleCounters {
    initialise: AtomicUsize,
    connect: AtomicUsize,
    disconnect: AtomicUsize,
    start: AtomicUsize,
    stop: AtomicUsize,
    dispose: AtomicUsize,
}

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct LifecycleCounts {
    pub initialise: usize,
    pub connect: usize,
    pub disconnect: usize,
    pub start: usize,
    pub stop: usize,
    pub dispose: usize,
}

impl LifecycleCounters {
    fn record(&self, hook: Hook) {
        let counter = match hook {
            Hook::Initialise => &self.initialise,
            Hook::Connect => &self.connect,
            Hook::Disconnect => &self.disconnect,
            Hook::Start => &self.start,
            Hook::Stop => &self.stop,
            Hook::Dispose => &self.dispose,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LifecycleCounts {
        LifecycleCounts {
            initialise: self.initialise.load(Ordering::Relaxed),
            connect: self.connect.load(Ordering::Relaxed),
            disconnect: self.disconnect.load(Ordering::Relaxed),
            start: self.start.load(Ordering::Relaxed),
            stop: self.stop.load(Ordering::Relaxed),
            dispose: self.dispose.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStats {
    pub connector: LifecycleCounters,
    pub dispatchers: LifecycleCounters,
    pub requesters: LifecycleCounters,
    pub receivers: LifecycleCounters,
    dispatched: AtomicUsize,
    received: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MemoryStats {
    /// Completed one-way and request-response sends.
    pub fn dispatched(&self) -> usize {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Messages handed to a flow by polling receivers.
    pub fn received(&self) -> usize {
        self.received.load(Ordering::Relaxed)
    }

    /// Most sends observed running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::Relaxed)
    }

    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::AcqRel);
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Default)]
struct Faults {
    connects: AtomicUsize,
    receiver_connects: AtomicUsize,
    dispatch: AtomicBool,
    poll: AtomicBool,
}

/// Count one refusal off `budget`; true while it was still positive.
fn refuse(budget: &AtomicUsize) -> bool {
    budget
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        .is_ok()
}

/// Transport over a [`MemoryBroker`], for tests, benchmarks and wiring
/// flows inside one process.
pub struct MemoryTransport {
    broker: Arc<MemoryBroker>,
    stats: Arc<MemoryStats>,
    faults: Arc<Faults>,
    dispatch_delay: Duration,
    poll_interval: Duration,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new(Arc::new(MemoryBroker::new()))
    }
}

impl MemoryTransport {
    pub fn new(broker: Arc<MemoryBroker>) -> Self {
        Self {
            broker,
            stats: Arc::new(MemoryStats::default()),
            faults: Arc::new(Faults::default()),
            dispatch_delay: Duration::ZERO,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Every send sleeps this long first, to simulate a slow peer.
    pub fn with_dispatch_delay(mut self, delay: Duration) -> Self {
        self.dispatch_delay = delay;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[inline]
    pub fn broker(&self) -> &Arc<MemoryBroker> {
        &self.broker
    }

    #[inline]
    pub fn stats(&self) -> &Arc<MemoryStats> {
        &self.stats
    }

    /// Refuse the next `n` transport connects.
    pub fn fail_connects(&self, n: usize) {
        self.faults.connects.store(n, Ordering::Relaxed);
    }

    /// Refuse the next `n` receiver connects, whichever receivers they are.
    pub fn fail_receiver_connects(&self, n: usize) {
        self.faults.receiver_connects.store(n, Ordering::Relaxed);
    }

    pub fn fail_dispatches(&self, on: bool) {
        self.faults.dispatch.store(on, Ordering::Relaxed);
    }

    pub fn fail_polls(&self, on: bool) {
        self.faults.poll.store(on, Ordering::Relaxed);
    }
}

impl TransportHooks for MemoryTransport {
    fn do_initialise(&self) -> anyhow::Result<()> {
        self.stats.connector.record(Hook::Initialise);
        Ok(())
    }

    fn do_connect(&self) -> anyhow::Result<()> {
        self.stats.connector.record(Hook::Connect);
        if refuse(&self.faults.connects) {
            return Err(anyhow!("memory broker refused connection"));
        }
        Ok(())
    }

    fn do_disconnect(&self) -> anyhow::Result<()> {
        self.stats.connector.record(Hook::Disconnect);
        Ok(())
    }

    fn do_start(&self) -> anyhow::Result<()> {
        self.stats.connector.record(Hook::Start);
        Ok(())
    }

    fn do_stop(&self) -> anyhow::Result<()> {
        self.stats.connector.record(Hook::Stop);
        Ok(())
    }

    fn do_dispose(&self) {
        self.stats.connector.record(Hook::Dispose);
    }
}

impl Transport for MemoryTransport {
    fn protocol(&self) -> &str {
        MEMORY_PROTOCOL
    }

    fn create_dispatcher(&self, endpoint: &Endpoint) -> anyhow::Result<Box<dyn DispatcherBackend>> {
        Ok(Box::new(MemoryDispatcher {
            address: endpoint.address().to_string(),
            broker: self.broker.clone(),
            stats: self.stats.clone(),
            faults: self.faults.clone(),
            delay: self.dispatch_delay,
        }))
    }

    fn create_requester(&self, endpoint: &Endpoint) -> anyhow::Result<Box<dyn RequesterBackend>> {
        Ok(Box::new(MemoryRequester {
            address: endpoint.address().to_string(),
            broker: self.broker.clone(),
            stats: self.stats.clone(),
        }))
    }

    fn create_receiver(
        &self,
        endpoint: &Endpoint,
        ctx: &ReceiverContext,
    ) -> anyhow::Result<Box<dyn ReceiverBackend>> {
        let responder = (endpoint.exchange_pattern() == ExchangePattern::RequestResponse)
            .then(|| ctx.clone());
        Ok(Box::new(MemoryReceiver {
            address: endpoint.address().to_string(),
            broker: self.broker.clone(),
            stats: self.stats.clone(),
            faults: self.faults.clone(),
            interval: self.poll_interval,
            responder,
        }))
    }
}

macro_rules! recording_hooks {
    ($ty:ty, $counters:ident) => {
        impl TransportHooks for $ty {
            fn do_initialise(&self) -> anyhow::Result<()> {
                self.stats.$counters.record(Hook::Initialise);
                Ok(())
            }

            fn do_connect(&self) -> anyhow::Result<()> {
                self.stats.$counters.record(Hook::Connect);
                Ok(())
            }

            fn do_disconnect(&self) -> anyhow::Result<()> {
                self.stats.$counters.record(Hook::Disconnect);
                Ok(())
            }

            fn do_start(&self) -> anyhow::Result<()> {
                self.stats.$counters.record(Hook::Start);
                Ok(())
            }

            fn do_stop(&self) -> anyhow::Result<()> {
                self.stats.$counters.record(Hook::Stop);
                Ok(())
            }

            fn do_dispose(&self) {
                self.stats.$counters.record(Hook::Dispose);
            }
        }
    };
}

struct MemoryDispatcher {
    address: String,
    broker: Arc<MemoryBroker>,
    stats: Arc<MemoryStats>,
    faults: Arc<Faults>,
    delay: Duration,
}

recording_hooks!(MemoryDispatcher, dispatchers);

impl MemoryDispatcher {
    fn send<R>(&self, f: impl FnOnce() -> anyhow::Result<R>) -> anyhow::Result<R> {
        self.stats.enter();
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let res = if self.faults.dispatch.load(Ordering::Relaxed) {
            Err(anyhow!("memory dispatch to '{}' failed", self.address))
        } else {
            f()
        };
        self.stats.leave();
        if res.is_ok() {
            self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
        }
        res
    }
}

impl DispatcherBackend for MemoryDispatcher {
    fn do_dispatch(&self, event: Event) -> anyhow::Result<()> {
        self.send(|| {
            self.broker.push(&self.address, event.into_payload());
            Ok(())
        })
    }

    fn do_send(&self, event: Event) -> anyhow::Result<Option<Event>> {
        self.send(|| match self.broker.responder(&self.address) {
            Some(ctx) => ctx.route(event),
            None => {
                self.broker.push(&self.address, event.into_payload());
                Ok(None)
            }
        })
    }
}

struct MemoryRequester {
    address: String,
    broker: Arc<MemoryBroker>,
    stats: Arc<MemoryStats>,
}

recording_hooks!(MemoryRequester, requesters);

impl RequesterBackend for MemoryRequester {
    fn do_request(&self, timeout: Duration) -> anyhow::Result<Option<Bytes>> {
        if timeout.is_zero() {
            return Ok(self.broker.try_pop(&self.address));
        }
        Ok(self.broker.pop(&self.address, timeout))
    }
}

/// Polls the address queue for one-way endpoints; registers itself as the
/// synchronous responder for request-response endpoints.
struct MemoryReceiver {
    address: String,
    broker: Arc<MemoryBroker>,
    stats: Arc<MemoryStats>,
    faults: Arc<Faults>,
    interval: Duration,
    responder: Option<ReceiverContext>,
}

impl TransportHooks for MemoryReceiver {
    fn do_initialise(&self) -> anyhow::Result<()> {
        self.stats.receivers.record(Hook::Initialise);
        Ok(())
    }

    fn do_connect(&self) -> anyhow::Result<()> {
        self.stats.receivers.record(Hook::Connect);
        if refuse(&self.faults.receiver_connects) {
            return Err(anyhow!("memory broker refused receiver on '{}'", self.address));
        }
        Ok(())
    }

    fn do_disconnect(&self) -> anyhow::Result<()> {
        self.stats.receivers.record(Hook::Disconnect);
        Ok(())
    }

    fn do_start(&self) -> anyhow::Result<()> {
        self.stats.receivers.record(Hook::Start);
        if let Some(ctx) = &self.responder {
            self.broker.set_responder(&self.address, ctx.clone());
        }
        Ok(())
    }

    fn do_stop(&self) -> anyhow::Result<()> {
        self.stats.receivers.record(Hook::Stop);
        if self.responder.is_some() {
            self.broker.clear_responder(&self.address);
        }
        Ok(())
    }

    fn do_dispose(&self) {
        self.stats.receivers.record(Hook::Dispose);
    }
}

impl ReceiverBackend for MemoryReceiver {
    fn polling_interval(&self) -> Option<Duration> {
        self.responder.is_none().then_some(self.interval)
    }

    fn poll(&self, ctx: &ReceiverContext) -> anyhow::Result<()> {
        if self.faults.poll.load(Ordering::Relaxed) {
            return Err(anyhow!("memory poll of '{}' failed", self.address));
        }
        for payload in self.broker.drain(&self.address, POLL_BATCH) {
            self.stats.received.fetch_add(1, Ordering::Relaxed);
            ctx.route_async(ctx.create_event(payload));
        }
        Ok(())
    }
}
