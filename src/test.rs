#[cfg(test)]
mod tests {
    use crate::config::ConnectorConfig;
    use crate::connector::{Connector, ConnectorContext, Endpoint, EndpointKey, FlowConstruct};
    use crate::error::{ConnectorError, RejectReason};
    use crate::lifecycle::{Connectable, Lifecycle, LifecyclePhase, Transition};
    use crate::message::{Event, MessageProcessor, PROP_ORIGINATING_ENDPOINT};
    use crate::threading::{ExhaustedAction, ThreadingProfile};
    use crate::transport::MemoryTransport;
    use crate::utils::backoff::ReconnectCfg;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    const SLOW: Duration = Duration::from_millis(200);

    fn ep(address: &str) -> Endpoint {
        Endpoint::new("memory", address)
    }

    fn flow(name: &str) -> FlowConstruct {
        FlowConstruct::new(name)
    }

    fn started(connector: &Connector<MemoryTransport>) {
        connector.initialise().unwrap();
        connector.start().unwrap();
    }

    fn wait_until(timeout: Duration, mut f: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if f() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        f()
    }

    /// Context whose exception listener records every reported error.
    fn recording_ctx() -> (ConnectorContext, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let ctx = ConnectorContext::default().with_exception_listener(Arc::new(
            move |source: &str, err: &ConnectorError| sink.lock().push(format!("{source}: {err}")),
        ));
        (ctx, seen)
    }

    fn collecting_processor() -> (Arc<dyn MessageProcessor>, Arc<Mutex<Vec<Event>>>) {
        let got = Arc::new(Mutex::new(Vec::new()));
        let sink = got.clone();
        let processor = move |ev: Event| -> anyhow::Result<Option<Event>> {
            sink.lock().push(ev);
            Ok(None)
        };
        (Arc::new(processor), got)
    }

    fn slow_dispatcher_connector(profile: ThreadingProfile) -> Connector<MemoryTransport> {
        Connector::new(MemoryTransport::default().with_dispatch_delay(SLOW))
            .with_dispatcher_threading_profile(profile)
    }

    fn single_thread(action: ExhaustedAction) -> ThreadingProfile {
        ThreadingProfile::default()
            .with_max_threads_active(1)
            .with_max_buffer_size(0)
            .with_exhausted_action(action)
    }

    // ---- lifecycle ordering

    #[test]
    fn repeated_transitions_fail_without_side_effects() {
        let c = Connector::new(MemoryTransport::default());
        assert!(c.start().unwrap_err().is_lifecycle());

        c.initialise().unwrap();
        assert!(c.initialise().unwrap_err().is_lifecycle());
        assert_eq!(c.transport().stats().connector.snapshot().initialise, 1);

        c.start().unwrap();
        assert!(c.start().unwrap_err().is_lifecycle());
        assert_eq!(c.transport().stats().connector.snapshot().start, 1);

        c.stop().unwrap();
        assert!(c.stop().unwrap_err().is_lifecycle());
        assert_eq!(c.transport().stats().connector.snapshot().stop, 1);

        c.start().unwrap();
        c.stop().unwrap();
        c.dispose().unwrap();
        assert!(c.dispose().unwrap_err().is_lifecycle());
        assert!(c.start().is_err());

        let counts = c.transport().stats().connector.snapshot();
        assert_eq!(counts.start, 2);
        assert_eq!(counts.stop, 2);
        assert_eq!(counts.dispose, 1);
        assert_eq!(c.lifecycle_state().phase(), LifecyclePhase::Disposed);
    }

    #[test]
    fn dispose_while_started_stops_exactly_once() {
        let direct = Connector::new(MemoryTransport::default());
        started(&direct);
        direct.dispose().unwrap();

        let explicit = Connector::new(MemoryTransport::default());
        started(&explicit);
        explicit.stop().unwrap();
        explicit.dispose().unwrap();

        let a = direct.transport().stats().connector.snapshot();
        let b = explicit.transport().stats().connector.snapshot();
        assert_eq!(a.stop, 1);
        assert_eq!(a.disconnect, 1);
        assert_eq!(a, b);
    }

    #[test]
    fn concurrent_starts_let_exactly_one_through() {
        let c = Arc::new(Connector::new(MemoryTransport::default()));
        c.initialise().unwrap();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let c = c.clone();
                thread::spawn(move || c.start().is_ok())
            })
            .collect();
        let ok = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(ok, 1);
        assert_eq!(c.transport().stats().connector.snapshot().start, 1);
        assert!(c.is_started());
    }

    #[test]
    fn executors_exist_only_while_started() {
        let c = Connector::new(MemoryTransport::default());
        c.initialise().unwrap();
        assert!(c.dispatcher_work_manager().is_none());
        assert!(c.scheduler().is_none());
        assert!(c.dispatcher_pool().is_some());

        c.start().unwrap();
        assert!(c.receiver_work_manager().is_some());
        assert!(c.dispatcher_work_manager().is_some());
        assert!(c.requester_work_manager().is_some());
        assert!(c.scheduler().is_some());

        c.stop().unwrap();
        assert!(c.receiver_work_manager().is_none());
        assert!(c.dispatcher_work_manager().is_none());
        assert!(c.requester_work_manager().is_none());
        assert!(c.scheduler().is_none());
    }

    // ---- receivers

    #[test]
    fn receivers_survive_stop_and_restart() {
        let c = Connector::new(MemoryTransport::default());
        c.initialise().unwrap();
        let (p, _) = collecting_processor();
        c.register_listener(&ep("in"), p.clone(), &flow("f")).unwrap();
        c.register_listener(&ep("in2"), p, &flow("f")).unwrap();
        c.start().unwrap();
        assert!(c.receivers().iter().all(|r| r.is_connected() && r.is_started()));

        c.stop().unwrap();
        assert_eq!(c.receiver_count(), 2);
        for r in c.receivers() {
            assert!(!r.is_connected());
            assert!(!r.is_started());
            assert!(!r.is_polling());
        }

        c.start().unwrap();
        assert_eq!(c.receiver_count(), 2);
        assert!(c.receivers().iter().all(|r| r.is_connected() && r.is_started()));
        let counts = c.transport().stats().receivers.snapshot();
        assert_eq!(counts.initialise, 2);
        assert_eq!(counts.start, 4);
        assert_eq!(counts.stop, 2);
    }

    #[test]
    fn register_while_started_activates_immediately() {
        let c = Connector::new(MemoryTransport::default());
        started(&c);
        let (p, _) = collecting_processor();
        let r = c.register_listener(&ep("late"), p, &flow("f")).unwrap();
        assert!(r.is_connected());
        assert!(r.is_started());
        assert!(r.is_polling());
    }

    #[test]
    fn registering_same_key_twice_reuses_receiver() {
        let c = Connector::new(MemoryTransport::default());
        c.initialise().unwrap();
        let (p, _) = collecting_processor();
        let a = c.register_listener(&ep("in"), p.clone(), &flow("f")).unwrap();
        let b = c.register_listener(&ep("in"), p, &flow("f")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(c.receiver_count(), 1);
        assert_eq!(c.transport().stats().receivers.snapshot().initialise, 1);
    }

    #[test]
    fn unregister_tears_down_and_unknown_key_is_noop() {
        let c = Connector::new(MemoryTransport::default());
        started(&c);
        let (p, _) = collecting_processor();
        let r = c.register_listener(&ep("in"), p, &flow("f")).unwrap();

        assert!(!c.unregister_listener(&ep("nope"), &flow("f")).unwrap());
        assert!(c.unregister_listener(&ep("in"), &flow("f")).unwrap());
        assert_eq!(c.receiver_count(), 0);
        assert!(r.is_disposed());
        assert!(!r.is_connected());
        assert!(c.lookup_receiver(&EndpointKey::from("in")).is_none());

        let err = c.unregister_listener(&ep(""), &flow("f")).unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidArgument(_)));
    }

    #[test]
    fn unregister_flow_drops_only_its_receivers() {
        let c = Connector::new(MemoryTransport::default());
        c.initialise().unwrap();
        let (p, _) = collecting_processor();
        c.register_listener(&ep("a"), p.clone(), &flow("one")).unwrap();
        c.register_listener(&ep("b"), p.clone(), &flow("one")).unwrap();
        c.register_listener(&ep("c"), p, &flow("two")).unwrap();

        assert_eq!(c.receivers_for_flow(&flow("one")).len(), 2);
        assert_eq!(c.unregister_flow(&flow("one")), 2);
        assert_eq!(c.receiver_count(), 1);
        assert!(c.lookup_receiver(&EndpointKey::from("c")).is_some());
    }

    #[test]
    fn dispose_clears_registry() {
        let c = Connector::new(MemoryTransport::default());
        started(&c);
        let (p, _) = collecting_processor();
        let r = c.register_listener(&ep("in"), p.clone(), &flow("f")).unwrap();
        c.dispose().unwrap();
        assert_eq!(c.receiver_count(), 0);
        assert!(r.is_disposed());
        let err = c.register_listener(&ep("in"), p, &flow("f")).unwrap_err();
        assert!(matches!(err, ConnectorError::Disposed(_)));
    }

    #[test]
    fn polling_receiver_routes_dispatched_messages() {
        let c = Connector::new(MemoryTransport::default());
        started(&c);
        let (p, got) = collecting_processor();
        c.register_listener(&ep("orders"), p, &flow("f")).unwrap();

        for i in 0..3 {
            c.dispatch(&ep("orders"), Event::new(format!("m{i}"))).unwrap();
        }
        assert!(wait_until(Duration::from_secs(2), || got.lock().len() == 3));
        let got = got.lock();
        assert!(
            got.iter()
                .all(|ev| ev.property(PROP_ORIGINATING_ENDPOINT) == Some("orders"))
        );
        assert_eq!(c.transport().stats().received(), 3);
    }

    #[test]
    fn poll_failures_reach_exception_listener() {
        let (ctx, seen) = recording_ctx();
        let c = Connector::with_context(MemoryTransport::default(), ctx);
        started(&c);
        c.transport().fail_polls(true);
        let (p, _) = collecting_processor();
        let r = c.register_listener(&ep("in"), p, &flow("f")).unwrap();

        assert!(wait_until(Duration::from_secs(2), || !seen.lock().is_empty()));
        assert!(seen.lock()[0].contains("poll"));
        // the loop keeps running after a failure
        c.transport().fail_polls(false);
        assert!(r.is_polling());
    }

    #[test]
    fn listener_errors_reach_exception_listener() {
        let (ctx, seen) = recording_ctx();
        let c = Connector::with_context(MemoryTransport::default(), ctx);
        started(&c);
        let failing = |_: Event| -> anyhow::Result<Option<Event>> { anyhow::bail!("flow broke") };
        c.register_listener(&ep("in"), Arc::new(failing), &flow("f")).unwrap();
        c.dispatch(&ep("in"), Event::new("x")).unwrap();
        assert!(wait_until(Duration::from_secs(2), || {
            seen.lock().iter().any(|s| s.contains("flow broke"))
        }));
    }

    // ---- outbound

    #[test]
    fn dispatch_requires_started_connector() {
        let c = Connector::new(MemoryTransport::default());
        let err = c.dispatch(&ep("out"), Event::new("x")).unwrap_err();
        assert!(matches!(
            err,
            ConnectorError::NotStarted {
                phase: LifecyclePhase::Uninitialised,
                ..
            }
        ));

        c.initialise().unwrap();
        assert!(c.dispatch(&ep("out"), Event::new("x")).is_err());
        assert!(c.request(&ep("out"), Duration::ZERO).is_err());
    }

    #[test]
    fn unstarted_pooled_dispatcher_names_itself_in_errors() {
        let c = Connector::new(MemoryTransport::default());
        c.initialise().unwrap();
        let dispatcher = c.dispatcher_pool().unwrap().borrow(&ep("out")).unwrap();
        let err = dispatcher.process(Event::new("x")).unwrap_err();
        assert!(err.is_lifecycle());
        assert!(matches!(
            err,
            ConnectorError::NotReady {
                phase: LifecyclePhase::Initialised,
                ..
            }
        ));
        assert_eq!(
            err.to_string(),
            "'dispatcher:memory://out' cannot be used while initialised"
        );
    }

    #[test]
    fn foreign_protocol_is_rejected() {
        let c = Connector::new(MemoryTransport::default());
        started(&c);
        let err = c
            .dispatch(&Endpoint::new("jms", "queue"), Event::new("x"))
            .unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidArgument(_)));

        let (p, _) = collecting_processor();
        let err = c
            .register_listener(&Endpoint::new("jms", "queue"), p, &flow("f"))
            .unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidArgument(_)));
        // protocol match is case-insensitive
        assert!(c.dispatch(&Endpoint::new("MEMORY", "q"), Event::new("x")).is_ok());
    }

    #[test]
    fn request_response_returns_reply() {
        let c = Connector::new(MemoryTransport::default());
        started(&c);
        let upper = |ev: Event| -> anyhow::Result<Option<Event>> {
            let text = String::from_utf8_lossy(ev.payload()).to_uppercase();
            Ok(Some(ev.derive(text)))
        };
        let rr = ep("echo").request_response();
        c.register_listener(&rr, Arc::new(upper), &flow("f")).unwrap();

        let reply = c.dispatch(&rr, Event::new("ping")).unwrap().unwrap();
        assert_eq!(reply.payload().as_ref(), b"PING");
    }

    #[test]
    fn one_way_failures_go_to_listener_not_caller() {
        let (ctx, seen) = recording_ctx();
        let c = Connector::with_context(MemoryTransport::default(), ctx);
        started(&c);
        c.transport().fail_dispatches(true);

        assert!(c.dispatch(&ep("out"), Event::new("x")).unwrap().is_none());
        assert!(wait_until(Duration::from_secs(2), || {
            seen.lock().iter().any(|s| s.contains("dispatch to"))
        }));

        let err = c
            .dispatch(&ep("out").request_response(), Event::new("x"))
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Dispatch { .. }));
    }

    #[test]
    fn requester_reads_queued_message_or_times_out() {
        let c = Connector::new(MemoryTransport::default());
        started(&c);
        c.transport()
            .broker()
            .push("inbox", bytes::Bytes::from_static(b"hello"));

        let ev = c.request(&ep("inbox"), Duration::from_millis(100)).unwrap();
        assert_eq!(ev.unwrap().payload().as_ref(), b"hello");

        let t0 = Instant::now();
        assert!(c.request(&ep("inbox"), Duration::from_millis(50)).unwrap().is_none());
        assert!(t0.elapsed() >= Duration::from_millis(40));
        assert_eq!(c.requester_pool().unwrap().num_idle(), 1);
    }

    #[test]
    fn async_request_delivers_on_worker() {
        let c = Connector::new(MemoryTransport::default());
        started(&c);
        let (tx, rx) = std::sync::mpsc::channel();
        c.request_async(&ep("inbox"), Duration::from_secs(2), move |res| {
            let _ = tx.send(res.map(|ev| ev.map(|e| e.into_payload())));
        })
        .unwrap();
        c.transport()
            .broker()
            .push("inbox", bytes::Bytes::from_static(b"later"));

        let got = rx.recv_timeout(Duration::from_secs(3)).unwrap().unwrap();
        assert_eq!(got.as_deref(), Some(&b"later"[..]));
    }

    // ---- pools

    #[test]
    fn pools_drain_on_stop_and_refill_after_start() {
        let c = Connector::new(MemoryTransport::default());
        started(&c);
        let pool = c.dispatcher_pool().unwrap().clone();

        c.dispatch(&ep("out1"), Event::new("a")).unwrap();
        c.dispatch(&ep("out2"), Event::new("b")).unwrap();
        assert!(wait_until(Duration::from_secs(2), || pool.num_idle() == 2));

        c.stop().unwrap();
        assert_eq!(pool.num_active() + pool.num_idle(), 0);
        let counts = c.transport().stats().dispatchers.snapshot();
        assert_eq!(counts.dispose, 2);

        c.start().unwrap();
        c.dispatch(&ep("out1"), Event::new("c")).unwrap();
        c.dispatch(&ep("out2"), Event::new("d")).unwrap();
        assert!(wait_until(Duration::from_secs(2), || pool.num_idle() == 2));
        assert_eq!(c.transport().stats().dispatched(), 4);
    }

    #[test]
    fn clear_dispatchers_for_one_endpoint() {
        let c = Connector::new(MemoryTransport::default());
        started(&c);
        let rr1 = ep("out1").request_response();
        let rr2 = ep("out2").request_response();
        c.dispatch(&rr1, Event::new("a")).unwrap();
        c.dispatch(&rr2, Event::new("b")).unwrap();
        let pool = c.dispatcher_pool().unwrap();
        assert_eq!(pool.num_idle(), 2);

        c.clear_dispatchers_for(&rr1);
        assert_eq!(pool.num_idle_for(&rr1), 0);
        assert_eq!(pool.num_idle_for(&rr2), 1);
    }

    #[test]
    fn protocol_case_shares_one_dispatcher() {
        let c = Connector::new(MemoryTransport::default());
        started(&c);
        let upper = Endpoint::new("MEMORY", "out").request_response();
        c.dispatch(&upper, Event::new("a")).unwrap();
        c.dispatch(&ep("out").request_response(), Event::new("b")).unwrap();
        let pool = c.dispatcher_pool().unwrap();
        assert_eq!(pool.num_idle(), 1);
        assert_eq!(pool.keys().len(), 1);
    }

    #[test]
    fn dispatcher_pool_sized_from_threading_profile() {
        let run = Connector::new(MemoryTransport::default())
            .with_dispatcher_threading_profile(single_thread(ExhaustedAction::Run));
        run.initialise().unwrap();
        assert_eq!(run.dispatcher_pool().unwrap().config().max_active_per_key, Some(2));

        let wait = Connector::new(MemoryTransport::default())
            .with_dispatcher_threading_profile(single_thread(ExhaustedAction::Wait))
            .with_requester_threading_profile(ThreadingProfile::default().with_max_threads_active(3));
        wait.initialise().unwrap();
        assert_eq!(wait.dispatcher_pool().unwrap().config().max_active_per_key, Some(1));
        assert_eq!(wait.requester_pool().unwrap().config().max_active_per_key, Some(3));
    }

    // ---- exhausted actions through the dispatcher executor

    fn dispatch_pair(c: &Connector<MemoryTransport>) -> Vec<Result<(), ConnectorError>> {
        (0..2)
            .map(|i| c.dispatch(&ep("slow"), Event::new(format!("{i}"))).map(|_| ()))
            .collect()
    }

    #[test]
    fn run_action_executes_saturated_work_on_caller() {
        let c = slow_dispatcher_connector(single_thread(ExhaustedAction::Run));
        started(&c);
        let t0 = Instant::now();
        assert!(dispatch_pair(&c).iter().all(Result::is_ok));
        assert!(wait_until(Duration::from_secs(2), || c.transport().stats().dispatched() == 2));
        assert!(t0.elapsed() < SLOW * 2 + Duration::from_millis(100));
        assert_eq!(c.transport().stats().peak_in_flight(), 2);
    }

    #[test]
    fn wait_action_serialises_work() {
        let c = slow_dispatcher_connector(single_thread(ExhaustedAction::Wait));
        started(&c);
        let t0 = Instant::now();
        assert!(dispatch_pair(&c).iter().all(Result::is_ok));
        assert!(wait_until(Duration::from_secs(3), || c.transport().stats().dispatched() == 2));
        assert!(t0.elapsed() >= SLOW * 2);
        assert!(t0.elapsed() < SLOW * 2 + Duration::from_millis(400));
        assert_eq!(c.transport().stats().peak_in_flight(), 1);
    }

    #[test]
    fn wait_action_with_short_timeout_drops_second() {
        let (ctx, seen) = recording_ctx();
        let profile = single_thread(ExhaustedAction::Wait)
            .with_thread_wait_timeout(Duration::from_millis(1));
        let c = Connector::with_context(
            MemoryTransport::default().with_dispatch_delay(SLOW),
            ctx,
        )
        .with_dispatcher_threading_profile(profile);
        started(&c);

        assert!(dispatch_pair(&c).iter().all(Result::is_ok));
        thread::sleep(SLOW * 3);
        assert_eq!(c.transport().stats().dispatched(), 1);
        assert!(seen.lock().iter().any(|s| s.contains("timed out")));
    }

    #[test]
    fn abort_action_surfaces_rejection() {
        let c = slow_dispatcher_connector(single_thread(ExhaustedAction::Abort));
        started(&c);
        let results = dispatch_pair(&c);
        assert!(results[0].is_ok());
        match &results[1] {
            Err(ConnectorError::Rejected(rejected)) => {
                assert_eq!(rejected.reason, RejectReason::Aborted)
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        thread::sleep(SLOW * 2);
        assert_eq!(c.transport().stats().dispatched(), 1);
    }

    #[test]
    fn discard_action_drops_silently() {
        let c = slow_dispatcher_connector(single_thread(ExhaustedAction::Discard));
        started(&c);
        assert!(dispatch_pair(&c).iter().all(Result::is_ok));
        thread::sleep(SLOW * 3);
        assert_eq!(c.transport().stats().dispatched(), 1);
    }

    #[test]
    fn discard_oldest_keeps_first_second_and_last() {
        let profile = ThreadingProfile::default()
            .with_max_threads_active(2)
            .with_max_buffer_size(1)
            .with_exhausted_action(ExhaustedAction::DiscardOldest);
        let c = slow_dispatcher_connector(profile);
        started(&c);

        for _ in 0..3 {
            assert!(dispatch_pair(&c).iter().all(Result::is_ok));
        }
        thread::sleep(SLOW * 4);
        assert_eq!(c.transport().stats().dispatched(), 3);
        assert_eq!(c.dispatcher_work_manager().unwrap().stats().rejected, 3);
    }

    // ---- shutdown

    #[test]
    fn stop_drains_in_flight_dispatches() {
        let c = Connector::new(MemoryTransport::default().with_dispatch_delay(Duration::from_millis(50)));
        started(&c);
        for i in 0..3 {
            c.dispatch(&ep("out"), Event::new(format!("{i}"))).unwrap();
        }
        c.stop().unwrap();
        assert_eq!(c.transport().stats().dispatched(), 3);
    }

    #[test]
    fn stop_drains_queued_dispatches_to_fresh_endpoints() {
        let (ctx, seen) = recording_ctx();
        let profile = ThreadingProfile::default()
            .with_max_threads_active(1)
            .with_max_buffer_size(10)
            .with_exhausted_action(ExhaustedAction::Wait);
        let transport = MemoryTransport::default().with_dispatch_delay(Duration::from_millis(50));
        let c = Connector::with_context(transport, ctx).with_dispatcher_threading_profile(profile);
        started(&c);

        c.dispatch(&ep("a"), Event::new("first")).unwrap();
        c.dispatch(&ep("b"), Event::new("second")).unwrap();
        c.stop().unwrap();

        assert_eq!(c.transport().stats().dispatched(), 2);
        assert!(seen.lock().is_empty(), "{:?}", seen.lock());
        assert_eq!(c.transport().broker().depth("a"), 1);
        assert_eq!(c.transport().broker().depth("b"), 1);
    }

    #[test]
    fn stop_gives_up_after_shutdown_timeout() {
        let ctx = ConnectorContext::default().with_shutdown_timeout(Duration::from_millis(50));
        let profile = ThreadingProfile::default()
            .with_max_threads_active(1)
            .with_max_buffer_size(10)
            .with_exhausted_action(ExhaustedAction::Wait);
        let c = Connector::with_context(MemoryTransport::default().with_dispatch_delay(SLOW), ctx)
            .with_dispatcher_threading_profile(profile);
        started(&c);
        for i in 0..5 {
            c.dispatch(&ep("out"), Event::new(format!("{i}"))).unwrap();
        }

        let t0 = Instant::now();
        c.stop().unwrap();
        assert!(t0.elapsed() < SLOW * 2);
        // the running send finishes, queued ones are dropped
        thread::sleep(SLOW * 2);
        assert_eq!(c.transport().stats().dispatched(), 1);
    }

    // ---- connection

    #[test]
    fn connect_twice_connects_transport_once() {
        let c = Connector::new(MemoryTransport::default());
        c.initialise().unwrap();
        c.connect().unwrap();
        c.connect().unwrap();
        assert!(c.is_connected());
        c.start().unwrap();
        assert_eq!(c.transport().stats().connector.snapshot().connect, 1);

        c.disconnect().unwrap();
        assert!(!c.is_connected());
        assert!(!c.is_started());
        c.disconnect().unwrap();
        assert_eq!(c.transport().stats().connector.snapshot().disconnect, 1);
    }

    #[test]
    fn connect_brings_receivers_up_with_connector() {
        let c = Connector::new(MemoryTransport::default());
        c.initialise().unwrap();
        let (p, _) = collecting_processor();
        let r = c.register_listener(&ep("in"), p, &flow("f")).unwrap();
        c.connect().unwrap();
        assert!(r.is_connected());
        assert!(!r.is_started());
        c.disconnect().unwrap();
        assert!(!r.is_connected());
    }

    #[test]
    fn reconnect_retries_refused_connects() {
        let transport = MemoryTransport::default();
        transport.fail_connects(2);
        let c = Connector::new(transport).with_reconnect(ReconnectCfg {
            fast_attempts: 2,
            fast_delay_ms: 5,
            base_delay_ms: 5,
            max_delay_ms: 20,
            factor: 2.0,
            max_retries: Some(3),
        });
        started(&c);
        assert!(c.is_connected());
        assert_eq!(c.transport().stats().connector.snapshot().connect, 3);
    }

    #[test]
    fn failed_start_commits_forward_and_can_be_stopped() {
        let transport = MemoryTransport::default();
        transport.fail_connects(1);
        let c = Connector::new(transport);
        c.initialise().unwrap();

        let err = c.start().unwrap_err();
        assert!(matches!(err, ConnectorError::Connection { .. }));
        assert_eq!(c.lifecycle_state().phase(), LifecyclePhase::Started);
        assert_eq!(c.lifecycle_state().last_failure(), Some(Transition::Start));
        assert!(!c.is_connected());

        c.stop().unwrap();
        c.start().unwrap();
        assert!(c.is_connected());
        assert_eq!(c.lifecycle_state().last_failure(), None);
    }

    #[test]
    fn refused_receiver_fails_start_but_others_come_up() {
        let transport = MemoryTransport::default();
        transport.fail_receiver_connects(1);
        let c = Connector::new(transport);
        c.initialise().unwrap();
        let (p, _) = collecting_processor();
        let a = c.register_listener(&ep("in"), p.clone(), &flow("f")).unwrap();
        let b = c.register_listener(&ep("in2"), p, &flow("f")).unwrap();

        let err = c.start().unwrap_err();
        assert!(matches!(err, ConnectorError::Connection { .. }), "{err}");
        assert_eq!(c.lifecycle_state().phase(), LifecyclePhase::Started);
        assert_eq!(c.lifecycle_state().last_failure(), Some(Transition::Start));
        assert!(c.is_connected());
        let up = [&a, &b].iter().filter(|r| r.is_started()).count();
        assert_eq!(up, 1);

        c.stop().unwrap();
        assert!(!a.is_started() && !b.is_started());
        assert!(!a.is_connected() && !b.is_connected());
        assert!(!c.is_connected());

        c.dispose().unwrap();
        assert_eq!(c.receiver_count(), 0);
        assert!(a.is_disposed() && b.is_disposed());
        let counts = c.transport().stats().receivers.snapshot();
        assert_eq!(counts.start, 1);
        assert_eq!(counts.stop, 1);
        assert_eq!(counts.dispose, 2);
    }

    // ---- configuration

    #[test]
    fn connector_from_config() {
        let cfg: ConnectorConfig = serde_json::from_value(json!({
            "name": "orders",
            "shutdown_timeout_ms": 100,
            "dispatcher_threading": { "max_threads_active": 3, "exhausted_action": "abort" },
            "requester_pool": { "max_active_per_key": 5 }
        }))
        .unwrap();
        let c = Connector::from_config(cfg, MemoryTransport::default(), ConnectorContext::default())
            .unwrap();
        assert_eq!(c.name(), "orders");
        assert_eq!(c.context().shutdown_timeout(), Duration::from_millis(100));
        assert_eq!(c.dispatcher_threading_profile().max_threads_active(), 3);

        c.initialise().unwrap();
        assert_eq!(c.dispatcher_pool().unwrap().config().max_active_per_key, Some(3));
        assert_eq!(c.requester_pool().unwrap().config().max_active_per_key, Some(5));
        c.start().unwrap();
        assert_eq!(c.dispatcher_work_manager().unwrap().name(), "orders.dispatcher");
    }

    #[test]
    fn name_is_fixed_after_initialise() {
        let mut c = Connector::new(MemoryTransport::default());
        assert_eq!(c.name(), "memory");
        assert!(c.set_name("  ").is_err());
        c.set_name("renamed").unwrap();
        assert_eq!(c.lifecycle_state().name(), "renamed");
        c.initialise().unwrap();
        assert!(c.set_name("again").is_err());
        assert_eq!(c.name(), "renamed");
    }
}
