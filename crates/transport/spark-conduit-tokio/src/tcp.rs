use std::{
    io,
    net::SocketAddr,
    sync::{LazyLock, OnceLock},
};

use socket2::{Domain, Protocol as SocketProtocol, Socket, Type};
use spark_conduit::{
    Protocol, ProtocolWitness, Received, Resolve, Service, ServiceDescriptor, TransportError,
    Witness, async_trait, register as register_protocol, required, with_default,
};
use tokio::net::{TcpListener, TcpStream, lookup_host};
use tracing::{debug, info};

use crate::{
    config::{TcpClientOptions, TcpServerConfig},
    io as stream_io,
};

static HOST: LazyLock<Witness<String>> = LazyLock::new(|| Witness::new("tcp.host"));
static PORT: LazyLock<Witness<u16>> = LazyLock::new(|| Witness::new("tcp.port"));
static NODELAY: LazyLock<Witness<bool>> = LazyLock::new(|| Witness::new("tcp.nodelay"));

/// 目标主机名或 IP 字面量。
pub fn host() -> &'static Witness<String> {
    &HOST
}

/// 目标端口。
pub fn port() -> &'static Witness<u16> {
    &PORT
}

/// 是否关闭 Nagle 算法，缺省为 `true`。
pub fn nodelay() -> &'static Witness<bool> {
    &NODELAY
}

/// TCP 建连目标：按顺序尝试的地址列表与套接字选项。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TcpEndpoint {
    pub addrs: Vec<SocketAddr>,
    pub options: TcpClientOptions,
}

impl TcpEndpoint {
    pub fn new(addr: SocketAddr) -> Self {
        Self::from_addrs(vec![addr])
    }

    pub fn from_addrs(addrs: Vec<SocketAddr>) -> Self {
        Self {
            addrs,
            options: TcpClientOptions::default(),
        }
    }

    pub fn with_options(mut self, options: TcpClientOptions) -> Self {
        self.options = options;
        self
    }
}

/// 基于 Tokio `TcpStream` 的连接。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 为核心的 `recv/send/close` 提供最直接的字节流实现，同时保留地址元数据供诊断使用；
/// - 分层协议（如 TLS）通过基础协议操作表使用它，从不直接触碰 `TcpStream`。
///
/// ## 契约 (What)
/// - `recv`：非空缓冲区上读到 0 字节报告为 `EndOfFlow`；
/// - `send`：写出整个缓冲区后返回其长度；
/// - `close`：执行写半关闭（发送 FIN），重复调用直接返回；关闭后 `send` 返回 `Closed`，
///   `recv` 仍可读到对端剩余数据；
/// - 连接被丢弃时释放套接字，`SO_LINGER` 决定未发送数据的去留。
#[derive(Debug)]
pub struct TcpFlow {
    stream: TcpStream,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    write_closed: bool,
}

impl TcpFlow {
    fn from_stream(stream: TcpStream, options: &TcpClientOptions) -> io::Result<Self> {
        options.apply(&stream)?;
        Ok(Self {
            local_addr: stream.local_addr()?,
            peer_addr: stream.peer_addr()?,
            stream,
            write_closed: false,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    pub fn into_stream(self) -> TcpStream {
        self.stream
    }
}

/// 明文 TCP 协议。
#[derive(Clone, Copy, Debug, Default)]
pub struct Tcp;

#[async_trait]
impl Protocol for Tcp {
    type Endpoint = TcpEndpoint;
    type Flow = TcpFlow;

    async fn connect(&self, endpoint: TcpEndpoint) -> Result<TcpFlow, TransportError> {
        let mut last_error = None;
        for addr in &endpoint.addrs {
            match TcpStream::connect(*addr).await {
                Ok(stream) => return Ok(TcpFlow::from_stream(stream, &endpoint.options)?),
                Err(err) => {
                    debug!(%addr, error = %err, "tcp connect attempt failed");
                    last_error = Some(err);
                }
            }
        }
        let err = last_error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "no address to connect to")
        });
        Err(err.into())
    }

    async fn recv(&self, flow: &mut TcpFlow, buf: &mut [u8]) -> Result<Received, TransportError> {
        stream_io::recv(&mut flow.stream, buf).await
    }

    async fn send(&self, flow: &mut TcpFlow, buf: &[u8]) -> Result<usize, TransportError> {
        if flow.write_closed {
            return Err(TransportError::Closed);
        }
        stream_io::send(&mut flow.stream, buf).await
    }

    async fn close(&self, flow: &mut TcpFlow) -> Result<(), TransportError> {
        if flow.write_closed {
            return Ok(());
        }
        flow.write_closed = true;
        stream_io::shutdown(&mut flow.stream).await
    }
}

/// TCP 服务端。
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpService;

/// 已绑定的 TCP 监听状态。
#[derive(Debug)]
pub struct TcpListenerState {
    listener: TcpListener,
    local_addr: SocketAddr,
    options: TcpClientOptions,
}

impl TcpListenerState {
    /// 实际绑定地址，端口为 0 时可据此得到系统分配的端口。
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 接受到的连接继承的套接字选项。
    pub fn accepted_options(&self) -> &TcpClientOptions {
        &self.options
    }
}

fn bind(config: &TcpServerConfig) -> io::Result<TcpListener> {
    let socket = Socket::new(
        Domain::for_address(config.bind),
        Type::STREAM,
        Some(SocketProtocol::TCP),
    )?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&config.bind.into())?;
    socket.listen(config.backlog)?;
    TcpListener::from_std(socket.into())
}

#[async_trait]
impl Service for TcpService {
    type Protocol = Tcp;
    type Configuration = TcpServerConfig;
    type State = TcpListenerState;

    async fn init(&self, config: TcpServerConfig) -> Result<TcpListenerState, TransportError> {
        let listener = bind(&config)?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, backlog = config.backlog, "tcp listener bound");
        Ok(TcpListenerState {
            listener,
            local_addr,
            options: config.accepted_options(),
        })
    }

    /// 单条连接上的失败（接受前被对端复位、套接字选项设置失败等）只丢弃该连接，
    /// 只有监听套接字本身的错误才会返回给调用方。
    async fn accept(&self, state: &TcpListenerState) -> Result<TcpFlow, TransportError> {
        loop {
            let (stream, peer_addr) = match state.listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) if stream_io::is_per_connection(&err) => {
                    debug!(local_addr = %state.local_addr, error = %err, "pending tcp connection dropped");
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            match TcpFlow::from_stream(stream, &state.options) {
                Ok(flow) => {
                    debug!(%peer_addr, local_addr = %state.local_addr, "tcp connection accepted");
                    return Ok(flow);
                }
                Err(err) => {
                    debug!(%peer_addr, error = %err, "accepted tcp connection dropped");
                }
            }
        }
    }

    async fn stop(&self, state: TcpListenerState) -> Result<(), TransportError> {
        debug!(local_addr = %state.local_addr, "tcp listener closed");
        drop(state);
        Ok(())
    }
}

/// 对 `(host, port)` 做 DNS 查询并组装 [`TcpEndpoint`]。
///
/// 查询失败或没有得到任何地址时返回 `None`，失败原因以 `debug!` 记录。
/// 叠加在 TCP 之上的协议（如 TLS）在自己的解析函数中复用它。
pub async fn lookup(host: &str, port: u16, options: TcpClientOptions) -> Option<TcpEndpoint> {
    let addrs: Vec<SocketAddr> = match lookup_host((host, port)).await {
        Ok(addrs) => addrs.collect(),
        Err(err) => {
            debug!(%host, port, error = %err, "dns lookup failed");
            return None;
        }
    };
    if addrs.is_empty() {
        return None;
    }
    Some(TcpEndpoint { addrs, options })
}

/// `(host, port, nodelay)` → DNS 查询 → [`TcpEndpoint`]。
pub fn resolver() -> Resolve<TcpEndpoint> {
    Resolve::new(
        (required(host()), required(port()), with_default(nodelay(), true)),
        |(host, port, nodelay): (String, u16, bool)| async move {
            lookup(&host, port, TcpClientOptions::default().with_nodelay(nodelay)).await
        },
    )
}

/// 在进程级注册表中注册 TCP 协议；重复调用返回同一对见证者。
pub fn register() -> (Witness<TcpEndpoint>, ProtocolWitness<Tcp>) {
    static REGISTERED: OnceLock<(Witness<TcpEndpoint>, ProtocolWitness<Tcp>)> = OnceLock::new();
    REGISTERED
        .get_or_init(|| register_protocol("tcp", Tcp))
        .clone()
}

/// 以已注册的 TCP 协议构造服务描述符。
pub fn service() -> ServiceDescriptor<TcpService> {
    ServiceDescriptor::new(&register().1, TcpService)
}
