//! # layering 模块说明
//!
//! ## 角色定位（Why）
//! - 把“会话层”（典型如 TLS）机械地套在任意已注册的基础协议之上，派生出新的协议与服务；
//! - 基础协议与会话实现互不感知：引擎只使用基础协议的 `recv/send/close/connect`
//!   以及抽象会话的六个操作。
//!
//! ## 关键约束（What）
//! - 握手失败时先关闭基础 Flow，再向上报告 `Handshake` 错误；
//! - 派生 `recv` 会吸收握手后的控制记录，直到得到明文或基础 Flow 结束；
//! - 派生 `close` 先发出会话的关闭记录，再关闭基础 Flow，本地标志保证幂等。

mod service;

use std::{fmt, io, pin::pin, sync::Arc};

use async_trait::async_trait;
use futures::future::{self, Either};
use tracing::{debug, warn};

pub use service::{LayeredService, LayeredState};

use crate::{
    BoxFuture,
    error::{BoxError, TransportError},
    protocol::{Protocol, Received},
    registry::ProtocolWitness,
};

/// 接收缓冲区大小：一条完整 TLS 记录（16 KiB 明文）加上协议开销。
const SCRATCH_LEN: usize = 18 * 1024;

/// 由握手协作者实现的会话状态机，只处理内存中的字节，从不触碰套接字。
///
/// # 契约说明（What）
/// - `feed_ciphertext`：交给会话一段从对端收到的密文；
/// - `take_plaintext`：取出已解密的明文；`Ok(None)` 表示当前没有可读明文；
/// - `feed_plaintext`：交给会话待加密的明文，返回被接受的字节数；
/// - `take_ciphertext`：取出下一段待发送的密文；`Ok(None)` 表示没有待发送数据；
/// - `initiate_close`：排队一条关闭通知，随后通过 `take_ciphertext` 取出；
/// - `is_handshaking` / `is_peer_closed`：握手与对端关闭状态。
pub trait Session: Send + 'static {
    fn is_handshaking(&self) -> bool;

    fn feed_ciphertext(&mut self, data: &[u8]) -> Result<(), BoxError>;

    fn take_plaintext(&mut self, buf: &mut [u8]) -> Result<Option<usize>, BoxError>;

    fn feed_plaintext(&mut self, data: &[u8]) -> Result<usize, BoxError>;

    fn take_ciphertext(&mut self) -> Result<Option<Vec<u8>>, BoxError>;

    fn initiate_close(&mut self);

    fn is_peer_closed(&self) -> bool;
}

/// 会话工厂：按客户端或服务端配置创建 [`Session`]。
pub trait Layer: Send + Sync + 'static {
    /// 客户端侧配置，成为派生协议端点的一部分。
    type ClientConfig: Send + Sync + 'static;
    /// 服务端侧配置，成为派生服务配置的一部分。
    type ServerConfig: Send + Sync + 'static;
    type Session: Session;

    fn client_session(&self, config: &Self::ClientConfig) -> Result<Self::Session, BoxError>;

    fn server_session(&self, config: &Self::ServerConfig) -> Result<Self::Session, BoxError>;
}

/// 基础协议 `B` 之上叠加会话层 `L` 得到的派生协议。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - “TLS over TCP”“TLS over Unix”只需一次注册，不必为每种组合各写一个传输实现；
/// - 派生协议本身也是普通 [`Protocol`]，可以再注册、再参与解析回退。
///
/// ## 逻辑（How）
/// - 端点为 `(基础端点, 客户端配置)`；`connect` 先创建会话，再建立基础连接并驱动握手；
/// - 握手循环：冲刷待发密文 → 若仍在握手则从基础 Flow 读取并喂给会话 → 重复；
/// - 收发阶段同样只经由基础协议的操作表与会话接口完成。
///
/// ## 契约（What）
/// - 握手阶段的任何失败都以 [`TransportError::Handshake`] 报告，此时基础 Flow 已关闭恰好一次；
/// - `recv` 在得到非空明文或基础 Flow 结束前不会返回 `Input(0)`（空缓冲区除外）；
/// - `send` 返回时全部输入已被会话接受，产生的密文已写入基础 Flow。
///
/// ## 风险（Trade-offs）
/// - 服务端握手在 `accept` 内串行完成，慢速对端会阻塞后续连接的接受。
pub struct Layered<B: Protocol, L: Layer> {
    base: ProtocolWitness<B>,
    layer: Arc<L>,
}

impl<B: Protocol, L: Layer> Layered<B, L> {
    pub fn new(base: &ProtocolWitness<B>, layer: L) -> Self {
        Self {
            base: base.clone(),
            layer: Arc::new(layer),
        }
    }

    pub fn base(&self) -> &ProtocolWitness<B> {
        &self.base
    }

    pub fn layer(&self) -> &Arc<L> {
        &self.layer
    }

    /// 以基础服务派生出叠加会话层的服务。
    pub fn service<S>(&self, base: S) -> LayeredService<S, L>
    where
        S: crate::service::Service<Protocol = B>,
    {
        LayeredService::new(self.clone(), base)
    }

    /// 在已建立的基础连接上完成握手；失败或超过 `deadline` 时关闭基础连接。
    pub(crate) async fn establish(
        &self,
        base: B::Flow,
        session: L::Session,
        deadline: Option<BoxFuture<'_, ()>>,
    ) -> Result<LayeredFlow<B, L>, TransportError> {
        let mut flow = LayeredFlow::new(base, session);
        let outcome = match deadline {
            None => self.handshake(&mut flow).await,
            Some(deadline) => {
                let handshake = pin!(self.handshake(&mut flow));
                match future::select(handshake, deadline).await {
                    Either::Left((result, _)) => result,
                    Either::Right(((), _)) => Err(TransportError::handshake(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "handshake timed out",
                    ))),
                }
            }
        };
        match outcome {
            Ok(()) => {
                debug!(base = self.base.name(), "handshake complete");
                Ok(flow)
            }
            Err(err) => {
                warn!(base = self.base.name(), error = %err, "handshake failed, closing base flow");
                flow.closed = true;
                if let Err(close_err) = self.base.protocol().close(&mut flow.base).await {
                    debug!(base = self.base.name(), error = %close_err, "base close after failed handshake");
                }
                Err(match err {
                    TransportError::Handshake(_) => err,
                    other => TransportError::handshake(other),
                })
            }
        }
    }

    async fn handshake(&self, flow: &mut LayeredFlow<B, L>) -> Result<(), TransportError> {
        loop {
            self.flush(flow).await?;
            if !flow.session.is_handshaking() {
                return Ok(());
            }
            let read = self
                .base
                .protocol()
                .recv(&mut flow.base, &mut flow.scratch[..])
                .await?;
            match read {
                Received::Input(n) => flow
                    .session
                    .feed_ciphertext(&flow.scratch[..n])
                    .map_err(TransportError::Handshake)?,
                Received::EndOfFlow => {
                    return Err(TransportError::handshake("peer closed during handshake"));
                }
            }
        }
    }

    async fn flush(&self, flow: &mut LayeredFlow<B, L>) -> Result<(), TransportError> {
        while let Some(bytes) = flow.session.take_ciphertext().map_err(TransportError::Other)? {
            self.send_base(&mut flow.base, &bytes).await?;
        }
        Ok(())
    }

    async fn send_base(&self, base: &mut B::Flow, mut bytes: &[u8]) -> Result<(), TransportError> {
        while !bytes.is_empty() {
            let written = self.base.protocol().send(base, bytes).await?;
            if written == 0 {
                return Err(io::Error::from(io::ErrorKind::WriteZero).into());
            }
            bytes = &bytes[written..];
        }
        Ok(())
    }
}

impl<B: Protocol, L: Layer> Clone for Layered<B, L> {
    fn clone(&self) -> Self {
        Self {
            base: self.base.clone(),
            layer: Arc::clone(&self.layer),
        }
    }
}

impl<B: Protocol, L: Layer> fmt::Debug for Layered<B, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Layered")
            .field("base", &self.base)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<B: Protocol, L: Layer> Protocol for Layered<B, L> {
    type Endpoint = (B::Endpoint, L::ClientConfig);
    type Flow = LayeredFlow<B, L>;

    async fn connect(&self, endpoint: Self::Endpoint) -> Result<Self::Flow, TransportError> {
        let (endpoint, config) = endpoint;
        let session = self
            .layer
            .client_session(&config)
            .map_err(TransportError::Handshake)?;
        let base = self.base.protocol().connect(endpoint).await?;
        self.establish(base, session, None).await
    }

    async fn recv(
        &self,
        flow: &mut Self::Flow,
        buf: &mut [u8],
    ) -> Result<Received, TransportError> {
        if flow.closed {
            return Err(TransportError::Closed);
        }
        if buf.is_empty() {
            return Ok(Received::Input(0));
        }
        loop {
            if let Some(n) = flow.session.take_plaintext(buf).map_err(TransportError::Other)? {
                return Ok(Received::Input(n));
            }
            if flow.eof || flow.session.is_peer_closed() {
                return Ok(Received::EndOfFlow);
            }
            let read = self
                .base
                .protocol()
                .recv(&mut flow.base, &mut flow.scratch[..])
                .await?;
            match read {
                Received::Input(0) => {}
                Received::Input(n) => {
                    flow.session
                        .feed_ciphertext(&flow.scratch[..n])
                        .map_err(TransportError::Other)?;
                    // 会话可能需要回应（如密钥更新）。
                    self.flush(flow).await?;
                }
                Received::EndOfFlow => flow.eof = true,
            }
        }
    }

    async fn send(&self, flow: &mut Self::Flow, buf: &[u8]) -> Result<usize, TransportError> {
        if flow.closed {
            return Err(TransportError::Closed);
        }
        let mut written = 0;
        while written < buf.len() {
            let accepted = flow
                .session
                .feed_plaintext(&buf[written..])
                .map_err(TransportError::Other)?;
            self.flush(flow).await?;
            if accepted == 0 {
                return Err(io::Error::from(io::ErrorKind::WriteZero).into());
            }
            written += accepted;
        }
        Ok(written)
    }

    async fn close(&self, flow: &mut Self::Flow) -> Result<(), TransportError> {
        if flow.closed {
            return Ok(());
        }
        flow.closed = true;
        flow.session.initiate_close();
        let flushed = self.flush(flow).await;
        let closed = self.base.protocol().close(&mut flow.base).await;
        flushed.and(closed)
    }
}

/// 派生协议的具体连接：基础连接 + 会话状态。
pub struct LayeredFlow<B: Protocol, L: Layer> {
    base: B::Flow,
    session: L::Session,
    scratch: Box<[u8]>,
    closed: bool,
    eof: bool,
}

impl<B: Protocol, L: Layer> LayeredFlow<B, L> {
    fn new(base: B::Flow, session: L::Session) -> Self {
        Self {
            base,
            session,
            scratch: vec![0; SCRATCH_LEN].into_boxed_slice(),
            closed: false,
            eof: false,
        }
    }

    /// 底层基础连接。
    pub fn base(&self) -> &B::Flow {
        &self.base
    }

    /// 会话状态，可用于读取协商结果（如 ALPN）。
    pub fn session(&self) -> &L::Session {
        &self.session
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl<B: Protocol, L: Layer> fmt::Debug for LayeredFlow<B, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayeredFlow")
            .field("closed", &self.closed)
            .field("eof", &self.eof)
            .finish_non_exhaustive()
    }
}
