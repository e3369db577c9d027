//! # session 模块说明
//!
//! ## 角色定位（Why）
//! - 把 `rustls` 的连接状态机适配为核心的 [`Session`] 接口：只在内存中搬运字节，
//!   收发由分层引擎经基础协议完成；
//! - 客户端与服务端共用同一实现，区别只在创建时使用的 `rustls` 连接类型。
//!
//! ## 关键约束（What）
//! - `read_tls` 在明文缓冲满时会拒绝继续读取，因此未消化的密文暂存在 `pending`，
//!   待明文被取走后再继续推进；
//! - 从不向 `read_tls` 传入空输入，空输入会被 `rustls` 解读为对端 EOF。

use std::{
    io::{self, Read, Write},
    sync::Arc,
};

use rustls::{ClientConnection, Connection, ProtocolVersion, ServerConnection};
use spark_conduit::{BoxError, Layer, Session};
use tracing::trace;

use crate::{config::TlsClientParams, hot_reload::HotReloadingServerConfig};

/// 基于 `rustls` 的会话层。
///
/// - 客户端配置为 [`TlsClientParams`]，每次建连创建一条 `ClientConnection`；
/// - 服务端配置为 [`HotReloadingServerConfig`]，每条接受到的连接读取一次当前快照，
///   证书轮换只影响之后的握手。
#[derive(Clone, Copy, Debug, Default)]
pub struct RustlsLayer;

impl Layer for RustlsLayer {
    type ClientConfig = TlsClientParams;
    type ServerConfig = HotReloadingServerConfig;
    type Session = RustlsSession;

    fn client_session(&self, params: &TlsClientParams) -> Result<RustlsSession, BoxError> {
        let conn = ClientConnection::new(Arc::clone(&params.config), params.server_name.clone())?;
        Ok(RustlsSession::new(conn.into()))
    }

    fn server_session(&self, config: &HotReloadingServerConfig) -> Result<RustlsSession, BoxError> {
        let conn = ServerConnection::new(config.snapshot())?;
        Ok(RustlsSession::new(conn.into()))
    }
}

/// 一条 TLS 会话的内存状态。
///
/// # 教案级注释
///
/// ## 逻辑（How）
/// - `feed_ciphertext` 把密文追加到 `pending`，随后 `pump` 交替执行
///   `read_tls` 与 `process_new_packets`，直到密文耗尽或出现待读明文；
/// - `take_plaintext` 先推进一次再从 `reader()` 读取：`WouldBlock` 表示暂无明文，
///   `Ok(0)` 表示对端发送了 `close_notify`；
/// - `take_ciphertext` 在 `wants_write` 为真时把全部待发记录写入同一个 `Vec`。
///
/// ## 契约（What）
/// - 协议错误（证书不受信任、记录损坏等）以 `rustls::Error` 返回，之后的调用会重复报告同一错误；
/// - 握手完成后可通过 [`Self::alpn_protocol`] 等方法读取协商结果。
pub struct RustlsSession {
    conn: Connection,
    pending: Vec<u8>,
    peer_closed: bool,
}

impl RustlsSession {
    fn new(conn: Connection) -> Self {
        Self {
            conn,
            pending: Vec::new(),
            peer_closed: false,
        }
    }

    /// 握手协商出的 ALPN 协议。
    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        self.conn.alpn_protocol()
    }

    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        self.conn.protocol_version()
    }

    /// 服务端收到的 SNI；客户端会话恒为 `None`。
    pub fn server_name(&self) -> Option<&str> {
        match &self.conn {
            Connection::Server(conn) => conn.server_name(),
            Connection::Client(_) => None,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn pump(&mut self) -> Result<(), BoxError> {
        loop {
            let state = self.conn.process_new_packets()?;
            if state.peer_has_closed() {
                self.peer_closed = true;
            }
            if self.pending.is_empty() || state.plaintext_bytes_to_read() > 0 {
                return Ok(());
            }
            let mut input: &[u8] = &self.pending;
            let read = self.conn.read_tls(&mut input)?;
            self.pending.drain(..read);
            if read == 0 {
                return Ok(());
            }
        }
    }
}

impl std::fmt::Debug for RustlsSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RustlsSession")
            .field("handshaking", &self.conn.is_handshaking())
            .field("pending", &self.pending.len())
            .field("peer_closed", &self.peer_closed)
            .finish()
    }
}

impl Session for RustlsSession {
    fn is_handshaking(&self) -> bool {
        self.conn.is_handshaking()
    }

    fn feed_ciphertext(&mut self, data: &[u8]) -> Result<(), BoxError> {
        if data.is_empty() {
            return Ok(());
        }
        self.pending.extend_from_slice(data);
        self.pump()
    }

    fn take_plaintext(&mut self, buf: &mut [u8]) -> Result<Option<usize>, BoxError> {
        self.pump()?;
        match self.conn.reader().read(buf) {
            Ok(0) if !buf.is_empty() => {
                self.peer_closed = true;
                Ok(None)
            }
            Ok(read) => Ok(Some(read)),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn feed_plaintext(&mut self, data: &[u8]) -> Result<usize, BoxError> {
        Ok(self.conn.writer().write(data)?)
    }

    fn take_ciphertext(&mut self) -> Result<Option<Vec<u8>>, BoxError> {
        if !self.conn.wants_write() {
            return Ok(None);
        }
        let mut out = Vec::new();
        while self.conn.wants_write() {
            self.conn.write_tls(&mut out)?;
        }
        trace!(len = out.len(), "tls records ready");
        Ok(Some(out))
    }

    fn initiate_close(&mut self) {
        self.conn.send_close_notify();
    }

    fn is_peer_closed(&self) -> bool {
        self.peer_closed
    }
}
