use async_trait::async_trait;

use crate::error::TransportError;

/// 单次接收的结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Received {
    /// 写入了缓冲区前 `n` 个字节。
    Input(usize),
    /// 对端已结束发送。
    EndOfFlow,
}

/// 协议实现的操作表：建连与 Flow 的收发、关闭。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 应用逻辑只面向抽象 Flow 编写一次，具体由哪个传输承载字节（TCP、TLS、Unix 套接字或外部实现）
///   在配置期决定；
/// - 协议实现只需要提供四个操作，注册、解析、分层与服务循环都由核心完成。
///
/// ## 契约（What）
/// - `connect`：根据具体端点建立连接，可能挂起、可能失败；
/// - `recv`：读取到 `buf`，返回 [`Received::Input`] 或 [`Received::EndOfFlow`]；
///   非空缓冲区上的 0 字节读取应报告为 `EndOfFlow`；
/// - `send`：返回实际写入的字节数，允许部分写入；
/// - `close`：释放连接，不要求幂等，幂等性由 [`Flow`](crate::Flow) 包装层保证；
/// - **前置条件**：端点类型需满足 `Send + Sync`，以便放入 [`Context`](crate::Context)。
#[async_trait]
pub trait Protocol: Send + Sync + 'static {
    /// 具体端点类型。
    type Endpoint: Send + Sync + 'static;
    /// 具体连接类型。
    type Flow: Send + 'static;

    async fn connect(&self, endpoint: Self::Endpoint) -> Result<Self::Flow, TransportError>;

    async fn recv(
        &self,
        flow: &mut Self::Flow,
        buf: &mut [u8],
    ) -> Result<Received, TransportError>;

    async fn send(&self, flow: &mut Self::Flow, buf: &[u8]) -> Result<usize, TransportError>;

    async fn close(&self, flow: &mut Self::Flow) -> Result<(), TransportError>;
}
