use std::{net::SocketAddr, time::Duration};

use spark_conduit::{
    ConduitError, Context, Flow, Received, ResolverTable, ServeExit, ServeOptions, StopSignal,
    serve,
};
use spark_conduit_tokio::{TcpEndpoint, TcpServerConfig, TokioRuntime, tcp};
use tracing_test::traced_test;

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().expect("addr")
}

fn free_port() -> u16 {
    std::net::TcpListener::bind(loopback())
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .expect("free port")
}

async fn recv_exact(flow: &mut Flow, len: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 64];
    while out.len() < len {
        match flow.recv(&mut buf).await.expect("recv") {
            Received::Input(n) => out.extend_from_slice(&buf[..n]),
            Received::EndOfFlow => break,
        }
    }
    out
}

#[tokio::test]
#[traced_test]
async fn resolves_and_accepts_over_loopback() {
    let (_, tcp_witness) = tcp::register();
    let service = tcp::service()
        .init(TcpServerConfig::new(loopback()))
        .await
        .expect("bind");
    let port = service.state().local_addr().port();

    let table = ResolverTable::builder()
        .add(&tcp_witness, 0, tcp::resolver())
        .build();
    let ctx = Context::new()
        .with(tcp::host(), "127.0.0.1".to_owned())
        .with(tcp::port(), port);

    let (client, server) = tokio::join!(table.resolve(&ctx), service.accept());
    let mut client = client.expect("resolve");
    let mut server = server.expect("accept").expect("not closed");

    assert!(client.is(&tcp_witness));
    let concrete = client.get_ref(&tcp_witness).expect("tcp flow");
    assert_eq!(concrete.peer_addr().port(), port);
    assert!(concrete.stream().nodelay().expect("nodelay"));

    client.send_all(b"ping").await.expect("send");
    assert_eq!(recv_exact(&mut server, 4).await, b"ping");

    client.close().await.expect("close");
    let mut buf = [0u8; 8];
    assert_eq!(server.recv(&mut buf).await.expect("eof"), Received::EndOfFlow);
    client.close().await.expect("second close");

    service.stop().await.expect("stop");
    assert!(logs_contain("tcp listener bound"));
}

#[tokio::test]
async fn serve_loop_echoes_until_stopped() {
    let (_, tcp_witness) = tcp::register();
    let port = free_port();
    let bind: SocketAddr = ([127, 0, 0, 1], port).into();
    let (trigger, signal) = StopSignal::channel();

    let server = tokio::spawn(async move {
        serve(
            &TokioRuntime::current(),
            &tcp::service(),
            TcpServerConfig::new(bind),
            ServeOptions::new().with_stop(signal),
            |mut flow: Flow| async move {
                let mut buf = [0u8; 64];
                while let Ok(Received::Input(n)) = flow.recv(&mut buf).await {
                    if flow.send_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
                let _ = flow.close().await;
            },
        )
        .await
    });

    let mut client = None;
    for _ in 0..50 {
        match tcp_witness.connect(TcpEndpoint::new(bind)).await {
            Ok(flow) => {
                client = Some(flow);
                break;
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
        }
    }
    let mut client = client.expect("server never came up");

    client.send_all(b"hello over tcp").await.expect("send");
    assert_eq!(recv_exact(&mut client, 14).await, b"hello over tcp");
    client.close().await.expect("close");

    trigger.trigger();
    let exit = server.await.expect("join").expect("serve");
    assert_eq!(exit, ServeExit::Stopped);
}

#[tokio::test]
async fn refused_connection_is_reported() {
    let (_, tcp_witness) = tcp::register();
    let port = free_port();
    let table = ResolverTable::builder()
        .add(&tcp_witness, 0, tcp::resolver())
        .build();
    let ctx = Context::new()
        .with(tcp::host(), "127.0.0.1".to_owned())
        .with(tcp::port(), port);

    let err = table.resolve(&ctx).await.expect_err("nobody listens");
    let attempts = err.attempts();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].protocol.as_ref(), "tcp");
    assert!(matches!(attempts[0].error, ConduitError::Transport { .. }));
}

#[tokio::test]
async fn missing_port_is_not_applicable() {
    let (_, tcp_witness) = tcp::register();
    let table = ResolverTable::builder()
        .add(&tcp_witness, 0, tcp::resolver())
        .build();
    let ctx = Context::new().with(tcp::host(), "localhost".to_owned());

    let err = table.resolve(&ctx).await.expect_err("no port");
    assert!(matches!(
        err,
        ConduitError::ResolutionFailed { skipped: 1, .. }
    ));
}

#[tokio::test]
async fn clients_resetting_before_accept_do_not_stop_the_listener() {
    let port = free_port();
    let bind: SocketAddr = ([127, 0, 0, 1], port).into();

    let server = tokio::spawn(async move {
        serve(
            &TokioRuntime::current(),
            &tcp::service(),
            TcpServerConfig::new(bind),
            ServeOptions::new().with_timeout(Duration::from_millis(500)),
            |mut flow: Flow| async move {
                let _ = flow.close().await;
            },
        )
        .await
    });

    let mut reset = 0;
    for _ in 0..200 {
        if reset == 30 {
            break;
        }
        match std::net::TcpStream::connect(bind) {
            Ok(stream) => {
                socket2::SockRef::from(&stream)
                    .set_linger(Some(Duration::ZERO))
                    .expect("linger");
                drop(stream);
                reset += 1;
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
        }
    }
    assert_eq!(reset, 30, "server never came up");

    let exit = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("serve finished")
        .expect("join")
        .expect("reset clients stay local to their connection");
    assert_eq!(exit, ServeExit::TimedOut);
}
