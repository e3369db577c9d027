//! 集成测试共享的内存协议、会话层与运行时替身。
#![allow(dead_code)]

use std::{
    collections::VecDeque,
    io,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use spark_conduit::{
    BoxError, BoxFuture, Layer, Protocol, Received, Runtime, Service, Session, TransportError,
    async_trait,
};

/// 协议与服务共享的调用计数。
#[derive(Clone, Debug, Default)]
pub struct Counters {
    pub connects: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
    pub inits: Arc<AtomicUsize>,
    pub accepts: Arc<AtomicUsize>,
    pub stops: Arc<AtomicUsize>,
}

impl Counters {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// 内存回环连接：写入的字节按原样读回。
#[derive(Debug, Default)]
pub struct EchoFlow {
    pub endpoint: (String, u16),
    pub buffer: VecDeque<u8>,
    pub sent: Vec<u8>,
    closed: bool,
}

/// 建连得到 [`EchoFlow`] 的内存协议。
#[derive(Debug, Default)]
pub struct EchoProtocol {
    pub counters: Counters,
    pub fail_connect: bool,
    pub fail_close: bool,
}

impl EchoProtocol {
    pub fn new(counters: &Counters) -> Self {
        Self {
            counters: counters.clone(),
            ..Self::default()
        }
    }

    pub fn failing(counters: &Counters) -> Self {
        Self {
            fail_connect: true,
            ..Self::new(counters)
        }
    }

    /// `close` 计数后报告失败。
    pub fn failing_close(counters: &Counters) -> Self {
        Self {
            fail_close: true,
            ..Self::new(counters)
        }
    }
}

#[async_trait]
impl Protocol for EchoProtocol {
    type Endpoint = (String, u16);
    type Flow = EchoFlow;

    async fn connect(&self, endpoint: Self::Endpoint) -> Result<EchoFlow, TransportError> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect {
            return Err(io::Error::from(io::ErrorKind::ConnectionRefused).into());
        }
        Ok(EchoFlow {
            endpoint,
            ..EchoFlow::default()
        })
    }

    async fn recv(&self, flow: &mut EchoFlow, buf: &mut [u8]) -> Result<Received, TransportError> {
        if flow.closed {
            return Err(TransportError::Closed);
        }
        if flow.buffer.is_empty() {
            return Ok(Received::EndOfFlow);
        }
        let n = buf.len().min(flow.buffer.len());
        for (slot, byte) in buf.iter_mut().zip(flow.buffer.drain(..n)) {
            *slot = byte;
        }
        Ok(Received::Input(n))
    }

    async fn send(&self, flow: &mut EchoFlow, buf: &[u8]) -> Result<usize, TransportError> {
        if flow.closed {
            return Err(TransportError::Closed);
        }
        flow.buffer.extend(buf);
        flow.sent.extend_from_slice(buf);
        Ok(buf.len())
    }

    async fn close(&self, flow: &mut EchoFlow) -> Result<(), TransportError> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        flow.closed = true;
        if self.fail_close {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe).into());
        }
        Ok(())
    }
}

/// 服务替身在 `accept` 上的行为。
#[derive(Clone, Copy, Debug)]
pub enum AcceptMode {
    /// 永不完成。
    Pending,
    /// 总是报告优雅关闭。
    Closed,
    /// 依次交出若干连接，然后优雅关闭。
    Yield(usize),
    /// 报告致命 IO 错误。
    Fail,
}

pub struct MockService {
    pub counters: Counters,
    pub mode: AcceptMode,
    pub fail_stop: bool,
}

impl MockService {
    pub fn new(counters: &Counters, mode: AcceptMode) -> Self {
        Self {
            counters: counters.clone(),
            mode,
            fail_stop: false,
        }
    }

    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }
}

#[async_trait]
impl Service for MockService {
    type Protocol = EchoProtocol;
    type Configuration = &'static str;
    type State = Mutex<usize>;

    async fn init(&self, config: &'static str) -> Result<Mutex<usize>, TransportError> {
        self.counters.inits.fetch_add(1, Ordering::SeqCst);
        if config == "bad" {
            return Err(io::Error::from(io::ErrorKind::AddrInUse).into());
        }
        Ok(Mutex::new(0))
    }

    async fn accept(&self, state: &Mutex<usize>) -> Result<EchoFlow, TransportError> {
        self.counters.accepts.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            AcceptMode::Pending => futures::future::pending().await,
            AcceptMode::Closed => Err(TransportError::Closed),
            AcceptMode::Fail => Err(io::Error::from(io::ErrorKind::PermissionDenied).into()),
            AcceptMode::Yield(total) => {
                let mut served = state.lock();
                if *served >= total {
                    return Err(TransportError::Closed);
                }
                *served += 1;
                let mut flow = EchoFlow::default();
                flow.buffer.extend(format!("conn-{}", *served).bytes());
                Ok(flow)
            }
        }
    }

    async fn stop(&self, _state: Mutex<usize>) -> Result<(), TransportError> {
        self.counters.stops.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop {
            return Err(TransportError::other("listener refused to close"));
        }
        Ok(())
    }
}

const HELLO: &[u8] = b"HELLO";

/// 以固定问候语完成握手、按字节异或“加密”的会话替身。
///
/// 在回环基础协议上，客户端发出的问候语会被原样读回，从而完成握手。
#[derive(Debug)]
pub struct XorSession {
    key: u8,
    reject_handshake: bool,
    handshaking: bool,
    hello_sent: bool,
    pending_hello: Vec<u8>,
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
    close_queued: bool,
    peer_closed: bool,
}

impl XorSession {
    fn new(key: u8, reject_handshake: bool) -> Self {
        Self {
            key,
            reject_handshake,
            handshaking: true,
            hello_sent: false,
            pending_hello: Vec::new(),
            inbound: VecDeque::new(),
            outbound: Vec::new(),
            close_queued: false,
            peer_closed: false,
        }
    }
}

impl Session for XorSession {
    fn is_handshaking(&self) -> bool {
        self.handshaking
    }

    fn feed_ciphertext(&mut self, data: &[u8]) -> Result<(), BoxError> {
        if self.reject_handshake && self.handshaking {
            return Err("peer sent an unacceptable hello".into());
        }
        let mut data = data;
        if self.handshaking {
            let missing = HELLO.len() - self.pending_hello.len();
            let take = missing.min(data.len());
            self.pending_hello.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.pending_hello.len() == HELLO.len() {
                if self.pending_hello != HELLO {
                    return Err("malformed hello".into());
                }
                self.handshaking = false;
            }
        }
        for byte in data {
            if *byte == 0xFF ^ self.key {
                self.peer_closed = true;
                break;
            }
            self.inbound.push_back(byte ^ self.key);
        }
        Ok(())
    }

    fn take_plaintext(&mut self, buf: &mut [u8]) -> Result<Option<usize>, BoxError> {
        if self.inbound.is_empty() {
            return Ok(None);
        }
        let n = buf.len().min(self.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(self.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(Some(n))
    }

    fn feed_plaintext(&mut self, data: &[u8]) -> Result<usize, BoxError> {
        self.outbound.extend(data.iter().map(|byte| byte ^ self.key));
        Ok(data.len())
    }

    fn take_ciphertext(&mut self) -> Result<Option<Vec<u8>>, BoxError> {
        if !self.hello_sent {
            self.hello_sent = true;
            return Ok(Some(HELLO.to_vec()));
        }
        if self.close_queued {
            self.close_queued = false;
            self.outbound.push(0xFF ^ self.key);
        }
        if self.outbound.is_empty() {
            return Ok(None);
        }
        Ok(Some(std::mem::take(&mut self.outbound)))
    }

    fn initiate_close(&mut self) {
        self.close_queued = true;
    }

    fn is_peer_closed(&self) -> bool {
        self.peer_closed
    }
}

/// 产生 [`XorSession`] 的会话层；客户端配置为异或密钥。
#[derive(Debug, Default)]
pub struct XorLayer {
    pub reject_handshake: bool,
    pub refuse_server_sessions: bool,
}

impl XorLayer {
    pub fn rejecting() -> Self {
        Self {
            reject_handshake: true,
            ..Self::default()
        }
    }

    /// `server_session` 总是失败。
    pub fn refusing_server_sessions() -> Self {
        Self {
            refuse_server_sessions: true,
            ..Self::default()
        }
    }
}

impl Layer for XorLayer {
    type ClientConfig = u8;
    type ServerConfig = u8;
    type Session = XorSession;

    fn client_session(&self, key: &u8) -> Result<XorSession, BoxError> {
        Ok(XorSession::new(*key, self.reject_handshake))
    }

    fn server_session(&self, key: &u8) -> Result<XorSession, BoxError> {
        if self.refuse_server_sessions {
            return Err("server session unavailable".into());
        }
        Ok(XorSession::new(*key, self.reject_handshake))
    }
}

/// 基于 Tokio 的运行时替身，统计派发次数。
#[derive(Clone, Debug, Default)]
pub struct TestRuntime {
    pub spawned: Arc<AtomicUsize>,
}

#[async_trait]
impl Runtime for TestRuntime {
    fn spawn_dyn(&self, task: BoxFuture<'static, ()>) {
        self.spawned.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(task);
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// 脚本化基础连接上的一次读取。
#[derive(Clone, Debug)]
pub enum Step {
    /// 交出这些字节；缓冲区不够时剩余部分留给下一次读取。
    Data(Vec<u8>),
    /// 读到零字节。
    Empty,
    /// 永不完成，模拟沉默的对端。
    Pending,
}

impl Step {
    pub fn data(bytes: &[u8]) -> Self {
        Self::Data(bytes.to_vec())
    }

    /// 以 [`XorSession`] 的密钥“加密”后的数据。
    pub fn sealed(plaintext: &[u8], key: u8) -> Self {
        Self::Data(plaintext.iter().map(|byte| byte ^ key).collect())
    }
}

/// 按脚本逐次交出读取结果的连接；脚本耗尽后报告 `EndOfFlow`。
#[derive(Debug, Default)]
pub struct ScriptedFlow {
    pub script: VecDeque<Step>,
    pub sent: Vec<u8>,
    closed: bool,
}

/// 端点即读取脚本的内存协议。
#[derive(Debug, Default)]
pub struct ScriptedProtocol {
    pub counters: Counters,
}

impl ScriptedProtocol {
    pub fn new(counters: &Counters) -> Self {
        Self {
            counters: counters.clone(),
        }
    }
}

#[async_trait]
impl Protocol for ScriptedProtocol {
    type Endpoint = Vec<Step>;
    type Flow = ScriptedFlow;

    async fn connect(&self, script: Vec<Step>) -> Result<ScriptedFlow, TransportError> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedFlow {
            script: script.into(),
            ..ScriptedFlow::default()
        })
    }

    async fn recv(
        &self,
        flow: &mut ScriptedFlow,
        buf: &mut [u8],
    ) -> Result<Received, TransportError> {
        if flow.closed {
            return Err(TransportError::Closed);
        }
        match flow.script.pop_front() {
            None => Ok(Received::EndOfFlow),
            Some(Step::Empty) => Ok(Received::Input(0)),
            Some(Step::Pending) => futures::future::pending().await,
            Some(Step::Data(mut bytes)) => {
                let n = buf.len().min(bytes.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                let rest = bytes.split_off(n);
                if !rest.is_empty() {
                    flow.script.push_front(Step::Data(rest));
                }
                Ok(Received::Input(n))
            }
        }
    }

    async fn send(&self, flow: &mut ScriptedFlow, buf: &[u8]) -> Result<usize, TransportError> {
        if flow.closed {
            return Err(TransportError::Closed);
        }
        flow.sent.extend_from_slice(buf);
        Ok(buf.len())
    }

    async fn close(&self, flow: &mut ScriptedFlow) -> Result<(), TransportError> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        flow.closed = true;
        Ok(())
    }
}

/// 依次交出配置中的脚本连接；脚本用尽后 `accept` 永不完成。
pub struct ScriptedService {
    pub counters: Counters,
}

impl ScriptedService {
    pub fn new(counters: &Counters) -> Self {
        Self {
            counters: counters.clone(),
        }
    }
}

#[async_trait]
impl Service for ScriptedService {
    type Protocol = ScriptedProtocol;
    type Configuration = Vec<Vec<Step>>;
    type State = Mutex<VecDeque<Vec<Step>>>;

    async fn init(&self, scripts: Vec<Vec<Step>>) -> Result<Self::State, TransportError> {
        self.counters.inits.fetch_add(1, Ordering::SeqCst);
        Ok(Mutex::new(scripts.into()))
    }

    async fn accept(&self, state: &Self::State) -> Result<ScriptedFlow, TransportError> {
        self.counters.accepts.fetch_add(1, Ordering::SeqCst);
        let next = state.lock().pop_front();
        match next {
            Some(script) => Ok(ScriptedFlow {
                script: script.into(),
                ..ScriptedFlow::default()
            }),
            None => futures::future::pending().await,
        }
    }

    async fn stop(&self, _state: Self::State) -> Result<(), TransportError> {
        self.counters.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
