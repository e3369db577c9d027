mod support;

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use spark_conduit::{
    ConduitError, Flow, Received, ServeExit, ServeOptions, ServiceDescriptor, StopSignal, register,
    serve,
};
use support::{AcceptMode, Counters, EchoProtocol, MockService, TestRuntime};
use tracing_test::traced_test;

fn descriptor(counters: &Counters, mode: AcceptMode) -> ServiceDescriptor<MockService> {
    let (_, witness) = register("mock", EchoProtocol::new(counters));
    ServiceDescriptor::new(&witness, MockService::new(counters, mode))
}

async fn ignore(_flow: Flow) {}

#[tokio::test]
async fn immediate_stop_terminates_pending_accept() {
    let counters = Counters::default();
    let runtime = TestRuntime::default();
    let options = ServeOptions::new().with_stop(StopSignal::new(async {}));

    let exit = serve(
        &runtime,
        &descriptor(&counters, AcceptMode::Pending),
        "ok",
        options,
        ignore,
    )
    .await
    .expect("serve");

    assert_eq!(exit, ServeExit::Stopped);
    assert_eq!(Counters::get(&counters.stops), 1);
    assert_eq!(runtime.spawned.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn graceful_close_is_not_fatal() {
    let counters = Counters::default();
    let exit = serve(
        &TestRuntime::default(),
        &descriptor(&counters, AcceptMode::Closed),
        "ok",
        ServeOptions::new(),
        ignore,
    )
    .await
    .expect("serve");

    assert_eq!(exit, ServeExit::Closed);
    assert_eq!(Counters::get(&counters.accepts), 1);
    assert_eq!(Counters::get(&counters.stops), 1);
}

#[tokio::test]
async fn idle_timeout_ends_the_loop() {
    let counters = Counters::default();
    let options = ServeOptions::new().with_timeout(Duration::from_millis(20));
    let exit = serve(
        &TestRuntime::default(),
        &descriptor(&counters, AcceptMode::Pending),
        "ok",
        options,
        ignore,
    )
    .await
    .expect("serve");

    assert_eq!(exit, ServeExit::TimedOut);
    assert_eq!(Counters::get(&counters.stops), 1);
}

#[tokio::test]
async fn stop_trigger_ends_the_loop() {
    let counters = Counters::default();
    let (trigger, signal) = StopSignal::channel();
    let runtime = TestRuntime::default();
    let descriptor = descriptor(&counters, AcceptMode::Pending);

    let serving = tokio::spawn(async move {
        serve(
            &runtime,
            &descriptor,
            "ok",
            ServeOptions::new().with_stop(signal),
            ignore,
        )
        .await
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    trigger.trigger();

    let exit = serving.await.expect("join").expect("serve");
    assert_eq!(exit, ServeExit::Stopped);
    assert_eq!(Counters::get(&counters.stops), 1);
}

#[tokio::test]
async fn accepted_flows_are_dispatched() {
    let counters = Counters::default();
    let runtime = TestRuntime::default();
    let handled = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let seen = Arc::clone(&handled);
    let exit = serve(
        &runtime,
        &descriptor(&counters, AcceptMode::Yield(3)),
        "ok",
        ServeOptions::new(),
        move |mut flow: Flow| {
            let seen = Arc::clone(&seen);
            let tx = tx.clone();
            async move {
                let mut buf = [0u8; 16];
                if let Ok(Received::Input(n)) = flow.recv(&mut buf).await {
                    let _ = tx.send(String::from_utf8_lossy(&buf[..n]).into_owned());
                }
                seen.fetch_add(1, Ordering::SeqCst);
            }
        },
    )
    .await
    .expect("serve");

    assert_eq!(exit, ServeExit::Closed);
    assert_eq!(runtime.spawned.load(Ordering::SeqCst), 3);

    let mut received = Vec::new();
    for _ in 0..3 {
        received.push(rx.recv().await.expect("handler output"));
    }
    received.sort();
    assert_eq!(received, vec!["conn-1", "conn-2", "conn-3"]);
    assert_eq!(Counters::get(&counters.stops), 1);
}

#[tokio::test]
async fn init_failure_skips_accept_and_stop() {
    let counters = Counters::default();
    let err = serve(
        &TestRuntime::default(),
        &descriptor(&counters, AcceptMode::Closed),
        "bad",
        ServeOptions::new(),
        ignore,
    )
    .await
    .expect_err("init must fail");

    assert!(matches!(err, ConduitError::ServiceInitFailed { .. }));
    assert_eq!(Counters::get(&counters.accepts), 0);
    assert_eq!(Counters::get(&counters.stops), 0);
}

#[tokio::test]
async fn stop_failure_is_reported() {
    let counters = Counters::default();
    let (_, witness) = register("mock", EchoProtocol::new(&counters));
    let descriptor = ServiceDescriptor::new(
        &witness,
        MockService::new(&counters, AcceptMode::Closed).failing_stop(),
    );

    let err = serve(
        &TestRuntime::default(),
        &descriptor,
        "ok",
        ServeOptions::new(),
        ignore,
    )
    .await
    .expect_err("stop must fail");
    assert!(matches!(err, ConduitError::ServiceStopFailed { .. }));
}

#[tokio::test]
#[traced_test]
async fn accept_error_wins_over_stop_error() {
    let counters = Counters::default();
    let (_, witness) = register("mock", EchoProtocol::new(&counters));
    let descriptor = ServiceDescriptor::new(
        &witness,
        MockService::new(&counters, AcceptMode::Fail).failing_stop(),
    )
    .with_name("edge-listener");

    let err = serve(
        &TestRuntime::default(),
        &descriptor,
        "ok",
        ServeOptions::new(),
        ignore,
    )
    .await
    .expect_err("accept must fail");

    match err {
        ConduitError::ServiceAcceptFailed { service, .. } => {
            assert_eq!(service.as_ref(), "edge-listener");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(Counters::get(&counters.stops), 1);
    assert!(logs_contain("stop failed after accept error"));
}
