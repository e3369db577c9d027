use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::{LazyLock, OnceLock},
};

use socket2::{Domain, SockAddr, Socket, Type};
use spark_conduit::{
    Protocol, ProtocolWitness, Received, Resolve, Service, ServiceDescriptor, TransportError,
    Witness, async_trait, register as register_protocol, required,
};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info};

use crate::{config::UnixServerConfig, io as stream_io};

static PATH: LazyLock<Witness<PathBuf>> = LazyLock::new(|| Witness::new("unix.path"));

/// Unix 域套接字路径。
pub fn path() -> &'static Witness<PathBuf> {
    &PATH
}

/// 基于 Tokio `UnixStream` 的连接，语义与 [`TcpFlow`](crate::tcp::TcpFlow) 一致。
#[derive(Debug)]
pub struct UnixFlow {
    stream: UnixStream,
    write_closed: bool,
}

impl UnixFlow {
    fn new(stream: UnixStream) -> Self {
        Self {
            stream,
            write_closed: false,
        }
    }

    pub fn stream(&self) -> &UnixStream {
        &self.stream
    }

    pub fn into_stream(self) -> UnixStream {
        self.stream
    }
}

/// Unix 域套接字协议，端点为套接字文件路径。
#[derive(Clone, Copy, Debug, Default)]
pub struct Unix;

#[async_trait]
impl Protocol for Unix {
    type Endpoint = PathBuf;
    type Flow = UnixFlow;

    async fn connect(&self, endpoint: PathBuf) -> Result<UnixFlow, TransportError> {
        let stream = UnixStream::connect(&endpoint).await?;
        Ok(UnixFlow::new(stream))
    }

    async fn recv(&self, flow: &mut UnixFlow, buf: &mut [u8]) -> Result<Received, TransportError> {
        stream_io::recv(&mut flow.stream, buf).await
    }

    async fn send(&self, flow: &mut UnixFlow, buf: &[u8]) -> Result<usize, TransportError> {
        if flow.write_closed {
            return Err(TransportError::Closed);
        }
        stream_io::send(&mut flow.stream, buf).await
    }

    async fn close(&self, flow: &mut UnixFlow) -> Result<(), TransportError> {
        if flow.write_closed {
            return Ok(());
        }
        flow.write_closed = true;
        stream_io::shutdown(&mut flow.stream).await
    }
}

/// Unix 域套接字服务端。
///
/// # 教案式说明
/// - **契约 (What)**：`init` 在 `remove_stale` 为真时先删除遗留的套接字文件再绑定；
///   `stop` 关闭监听并删除套接字文件，文件已不存在不视为错误；
/// - **风险 (Trade-offs)**：`remove_stale` 无法区分“遗留文件”与“另一进程正在监听”，
///   只应在确认独占该路径时开启。
#[derive(Clone, Copy, Debug, Default)]
pub struct UnixService;

/// 已绑定的 Unix 监听状态。
#[derive(Debug)]
pub struct UnixListenerState {
    listener: UnixListener,
    path: PathBuf,
}

impl UnixListenerState {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn remove_socket_file(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

fn bind(config: &UnixServerConfig) -> io::Result<UnixListener> {
    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SockAddr::unix(&config.path)?)?;
    socket.listen(config.backlog)?;
    UnixListener::from_std(socket.into())
}

#[async_trait]
impl Service for UnixService {
    type Protocol = Unix;
    type Configuration = UnixServerConfig;
    type State = UnixListenerState;

    async fn init(&self, config: UnixServerConfig) -> Result<UnixListenerState, TransportError> {
        if config.remove_stale {
            remove_socket_file(&config.path)?;
        }
        let listener = bind(&config)?;
        info!(path = %config.path.display(), "unix listener bound");
        Ok(UnixListenerState {
            listener,
            path: config.path,
        })
    }

    async fn accept(&self, state: &UnixListenerState) -> Result<UnixFlow, TransportError> {
        loop {
            match state.listener.accept().await {
                Ok((stream, _)) => {
                    debug!(path = %state.path.display(), "unix connection accepted");
                    return Ok(UnixFlow::new(stream));
                }
                Err(err) if stream_io::is_per_connection(&err) => {
                    debug!(path = %state.path.display(), error = %err, "pending unix connection dropped");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn stop(&self, state: UnixListenerState) -> Result<(), TransportError> {
        let UnixListenerState { listener, path } = state;
        drop(listener);
        remove_socket_file(&path)?;
        debug!(path = %path.display(), "unix listener closed");
        Ok(())
    }
}

/// `path` → 端点。
pub fn resolver() -> Resolve<PathBuf> {
    Resolve::ready(required(path()), Some)
}

/// 在进程级注册表中注册 Unix 协议；重复调用返回同一对见证者。
pub fn register() -> (Witness<PathBuf>, ProtocolWitness<Unix>) {
    static REGISTERED: OnceLock<(Witness<PathBuf>, ProtocolWitness<Unix>)> = OnceLock::new();
    REGISTERED
        .get_or_init(|| register_protocol("unix", Unix))
        .clone()
}

/// 以已注册的 Unix 协议构造服务描述符。
pub fn service() -> ServiceDescriptor<UnixService> {
    ServiceDescriptor::new(&register().1, UnixService)
}
