mod support;

use spark_conduit::{
    ConduitError, Context, FlowStage, Received, Resolve, ResolverTable, TransportError, Witness,
    register, required,
};
use support::{Counters, EchoProtocol};

#[tokio::test]
async fn echo_tcp_round_trip() {
    let counters = Counters::default();
    let (endpoint, echo_tcp) = register("echo-tcp", EchoProtocol::new(&counters));
    let host = Witness::<String>::new("host");
    let port = Witness::<u16>::new("port");

    let table = ResolverTable::builder()
        .add(
            &echo_tcp,
            0,
            Resolve::ready((required(&host), required(&port)), |(host, port)| {
                Some((host, port))
            }),
        )
        .build();
    let ctx = Context::new()
        .with(&host, "localhost".to_owned())
        .with(&port, 9000);

    let mut flow = table.resolve(&ctx).await.expect("resolve");
    assert!(flow.is(&echo_tcp));
    assert_eq!(endpoint.name(), "echo-tcp.endpoint");

    assert_eq!(flow.send(b"ping").await.expect("send"), 4);
    let mut buf = [0u8; 8];
    assert_eq!(flow.recv(&mut buf).await.expect("recv"), Received::Input(4));
    assert_eq!(&buf[..4], b"ping");

    flow.close().await.expect("close");
    flow.close().await.expect("double close is harmless");
    assert!(flow.is_closed());
    assert_eq!(Counters::get(&counters.closes), 1);

    let err = flow.send(b"late").await.expect_err("closed flow");
    assert!(matches!(
        err,
        ConduitError::Transport {
            stage: FlowStage::Send,
            source: TransportError::Closed,
            ..
        }
    ));
}

#[tokio::test]
async fn endpoint_witness_carries_resolved_endpoints() {
    let counters = Counters::default();
    let (endpoint, echo) = register("echo-direct", EchoProtocol::new(&counters));

    let table = ResolverTable::builder()
        .add(
            &echo,
            0,
            Resolve::ready(required(&endpoint), Some),
        )
        .build();
    let ctx = Context::new().with(&endpoint, ("10.0.0.1".to_owned(), 7));

    let flow = table.resolve(&ctx).await.expect("resolve");
    let concrete = flow.get_ref(&echo).expect("echo flow");
    assert_eq!(concrete.endpoint, ("10.0.0.1".to_owned(), 7));
}

#[tokio::test]
async fn foreign_witness_cannot_unwrap() {
    let counters = Counters::default();
    let (_, mine) = register("mine", EchoProtocol::new(&counters));
    let (_, theirs) = register("mine", EchoProtocol::new(&counters));

    let flow = mine
        .connect(("localhost".to_owned(), 1))
        .await
        .expect("connect");
    assert!(flow.get_ref(&theirs).is_none());

    let flow = flow.into_inner(&theirs).expect_err("identity mismatch");
    assert!(flow.into_inner(&mine).is_ok());
}
