use std::{any::Any, fmt, sync::Arc};

use async_trait::async_trait;

use crate::{
    error::{ConduitError, FlowStage, Result, TransportError},
    protocol::{Protocol, Received},
    registry::{ProtocolId, ProtocolWitness},
};

#[async_trait]
trait ErasedFlow: Send {
    async fn recv(&mut self, buf: &mut [u8]) -> core::result::Result<Received, TransportError>;
    async fn send(&mut self, buf: &[u8]) -> core::result::Result<usize, TransportError>;
    async fn close(&mut self) -> core::result::Result<(), TransportError>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

struct Bound<P: Protocol> {
    protocol: Arc<P>,
    // `None` 仅出现在 `Flow::into_inner` 取走之后，此时外层 Flow 已被消费。
    flow: Option<P::Flow>,
}

#[async_trait]
impl<P: Protocol> ErasedFlow for Bound<P> {
    async fn recv(&mut self, buf: &mut [u8]) -> core::result::Result<Received, TransportError> {
        let flow = self.flow.as_mut().ok_or(TransportError::Closed)?;
        self.protocol.recv(flow, buf).await
    }

    async fn send(&mut self, buf: &[u8]) -> core::result::Result<usize, TransportError> {
        let flow = self.flow.as_mut().ok_or(TransportError::Closed)?;
        self.protocol.send(flow, buf).await
    }

    async fn close(&mut self) -> core::result::Result<(), TransportError> {
        let flow = self.flow.as_mut().ok_or(TransportError::Closed)?;
        self.protocol.close(flow).await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// 隐藏具体协议类型的双向字节流。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 应用代码只依赖 `recv`/`send`/`close` 三个操作，不感知承载字节的具体传输；
/// - 仍保留“出身”：只有持有产生它的 [`ProtocolWitness`] 的代码才能取回具体连接，
///   避免把一个协议的连接误交给另一个协议的内部逻辑。
///
/// ## 逻辑（How）
/// - 内部以 trait 对象保存 `(Arc<P>, P::Flow)`，操作动态分派到协议实现；
/// - 解包先比较协议身份，再做受身份保护的向下转型；
/// - `closed` 标志让 `close` 在本层幂等，即便底层协议的 `close` 不是。
///
/// ## 契约（What）
/// - 关闭后的 `recv`/`send` 返回 `Transport { source: Closed }`；
/// - 重复 `close` 直接返回 `Ok(())`，不会再次触达协议实现；
/// - 错误统一映射为 [`ConduitError`]，附带协议名与阶段。
pub struct Flow {
    id: ProtocolId,
    name: Arc<str>,
    inner: Box<dyn ErasedFlow>,
    closed: bool,
}

impl Flow {
    pub(crate) fn new<P: Protocol>(witness: &ProtocolWitness<P>, flow: P::Flow) -> Self {
        Self {
            id: witness.id(),
            name: Arc::clone(witness.shared_name()),
            inner: Box::new(Bound {
                protocol: Arc::clone(witness.protocol()),
                flow: Some(flow),
            }),
            closed: false,
        }
    }

    /// 产生该 Flow 的协议身份。
    pub fn protocol_id(&self) -> ProtocolId {
        self.id
    }

    /// 产生该 Flow 的协议名称。
    pub fn protocol_name(&self) -> &str {
        &self.name
    }

    /// 是否由 `witness` 对应的协议产生。
    pub fn is<P: Protocol>(&self, witness: &ProtocolWitness<P>) -> bool {
        self.id == witness.id()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// 借用具体连接；身份不符时返回 `None`。
    pub fn get_ref<P: Protocol>(&self, witness: &ProtocolWitness<P>) -> Option<&P::Flow> {
        if !self.is(witness) {
            return None;
        }
        self.inner
            .as_any()
            .downcast_ref::<Bound<P>>()
            .and_then(|bound| bound.flow.as_ref())
    }

    /// 可变借用具体连接；身份不符时返回 `None`。
    pub fn get_mut<P: Protocol>(&mut self, witness: &ProtocolWitness<P>) -> Option<&mut P::Flow> {
        if !self.is(witness) {
            return None;
        }
        self.inner
            .as_any_mut()
            .downcast_mut::<Bound<P>>()
            .and_then(|bound| bound.flow.as_mut())
    }

    /// 取回具体连接；身份不符时原样返回 `Err(self)`。
    pub fn into_inner<P: Protocol>(
        mut self,
        witness: &ProtocolWitness<P>,
    ) -> core::result::Result<P::Flow, Flow> {
        if !self.is(witness) {
            return Err(self);
        }
        let taken = self
            .inner
            .as_any_mut()
            .downcast_mut::<Bound<P>>()
            .and_then(|bound| bound.flow.take());
        taken.ok_or(self)
    }

    /// 接收数据。
    pub async fn recv(&mut self, buf: &mut [u8]) -> Result<Received> {
        if self.closed {
            return Err(self.error(FlowStage::Recv, TransportError::Closed));
        }
        let result = self.inner.recv(buf).await;
        result.map_err(|err| self.error(FlowStage::Recv, err))
    }

    /// 发送数据，返回实际写入的字节数。
    pub async fn send(&mut self, buf: &[u8]) -> Result<usize> {
        if self.closed {
            return Err(self.error(FlowStage::Send, TransportError::Closed));
        }
        let result = self.inner.send(buf).await;
        result.map_err(|err| self.error(FlowStage::Send, err))
    }

    /// 循环发送直到整个缓冲区写出。
    pub async fn send_all(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let written = self.send(buf).await?;
            if written == 0 {
                let err = std::io::Error::from(std::io::ErrorKind::WriteZero);
                return Err(self.error(FlowStage::Send, err.into()));
            }
            buf = &buf[written..];
        }
        Ok(())
    }

    /// 关闭连接；重复调用返回 `Ok(())`。
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let result = self.inner.close().await;
        result.map_err(|err| self.error(FlowStage::Close, err))
    }

    fn error(&self, stage: FlowStage, err: TransportError) -> ConduitError {
        ConduitError::from_transport(&self.name, stage, err)
    }
}

impl fmt::Debug for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow")
            .field("protocol", &self.name)
            .field("id", &self.id)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}
