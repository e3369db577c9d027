//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 区分两层错误：协议实现向核心报告的 [`TransportError`]（边界错误），以及核心向调用方
//!   暴露的 [`ConduitError`]（带协议名与阶段的结构化错误）；
//! - 解析回退、握手失败关闭底层 Flow 等“局部恢复”都在核心完成，但最终失败必须带着足够的
//!   结构信息抵达调用方，不允许被静默吞掉。
//!
//! ## 设计要求（What）
//! - 所有错误实现 `thiserror::Error`，`source` 链完整保留底层原因；
//! - `TransportError::Closed` 是“优雅关闭”信号，Serve Loop 将其视为正常退出而非故障。

use std::{fmt, io, sync::Arc};

use thiserror::Error;

/// 协议实现携带的不透明底层错误。
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// `spark-conduit` 的统一结果别名。
pub type Result<T, E = ConduitError> = core::result::Result<T, E>;

/// 协议实现与核心之间的边界错误。
///
/// # 教案式说明
/// - **意图 (Why)**：协议实现只需要描述“发生了什么”，不必关心自己的注册名或所处阶段，
///   这些上下文由核心在映射为 [`ConduitError`] 时补齐；
/// - **契约 (What)**：
///   - `Closed`：监听资源或连接已被有意关闭，`accept` 返回它表示优雅停机；
///   - `Io`：操作系统层面的 IO 失败；
///   - `Handshake`：分层协议的会话建立失败，核心会映射为 [`ConduitError::HandshakeFailed`]；
///   - `Other`：其余来自外部协作者的不透明错误。
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    #[error("transport resource closed")]
    Closed,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("handshake failed: {0}")]
    Handshake(#[source] BoxError),
    #[error("{0}")]
    Other(#[source] BoxError),
}

impl TransportError {
    /// 包装任意外部错误。
    pub fn other(err: impl Into<BoxError>) -> Self {
        TransportError::Other(err.into())
    }

    /// 包装握手阶段的错误。
    pub fn handshake(err: impl Into<BoxError>) -> Self {
        TransportError::Handshake(err.into())
    }

    /// 是否为优雅关闭信号。
    pub fn is_graceful_close(&self) -> bool {
        matches!(self, TransportError::Closed)
    }
}

/// Flow 操作所处的阶段，用于错误诊断。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowStage {
    Connect,
    Recv,
    Send,
    Close,
}

impl fmt::Display for FlowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FlowStage::Connect => "connect",
            FlowStage::Recv => "recv",
            FlowStage::Send => "send",
            FlowStage::Close => "close",
        };
        f.write_str(label)
    }
}

/// 核心对调用方暴露的错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：每个变体都携带协议名或服务名，调用方无需理解具体协议即可定位
///   “哪个协议、哪个阶段”失败；
/// - **契约 (What)**：
///   - `ResolutionFailed`：解析表中没有解析器适用，或所有适用解析器的建连均失败；
///     `attempts` 按尝试顺序记录每次失败，`skipped` 统计未产出端点的解析器数量；
///   - `Transport`：收发、关闭或建连阶段的传输错误；
///   - `HandshakeFailed`：分层协议建立会话失败，此时底层 Flow 已被关闭；
///   - `ServiceInitFailed` / `ServiceAcceptFailed` / `ServiceStopFailed`：服务生命周期三阶段的失败；
/// - **风险 (Trade-offs)**：`ResolutionFailed` 递归包含 [`ConduitError`]，
///   嵌套的分层协议失败也能完整呈现，代价是错误值体积随尝试次数增长。
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConduitError {
    #[error(
        "no protocol established a flow ({failed} failed attempt(s), {skipped} resolver(s) not applicable)",
        failed = .attempts.len()
    )]
    ResolutionFailed {
        attempts: Vec<ResolveAttempt>,
        skipped: usize,
    },
    #[error("protocol `{protocol}` failed during {stage}: {source}")]
    Transport {
        protocol: Arc<str>,
        stage: FlowStage,
        source: TransportError,
    },
    #[error("handshake over `{protocol}` failed: {source}")]
    HandshakeFailed { protocol: Arc<str>, source: BoxError },
    #[error("service `{service}` failed to initialize: {source}")]
    ServiceInitFailed {
        service: Arc<str>,
        source: TransportError,
    },
    #[error("service `{service}` failed to accept: {source}")]
    ServiceAcceptFailed {
        service: Arc<str>,
        source: TransportError,
    },
    #[error("service `{service}` failed to stop: {source}")]
    ServiceStopFailed {
        service: Arc<str>,
        source: TransportError,
    },
}

impl ConduitError {
    /// 将协议边界错误映射为核心错误；握手错误提升为 `HandshakeFailed`。
    pub(crate) fn from_transport(
        protocol: &Arc<str>,
        stage: FlowStage,
        err: TransportError,
    ) -> Self {
        match err {
            TransportError::Handshake(source) => ConduitError::HandshakeFailed {
                protocol: Arc::clone(protocol),
                source,
            },
            source => ConduitError::Transport {
                protocol: Arc::clone(protocol),
                stage,
                source,
            },
        }
    }

    /// 解析失败时按顺序返回每次尝试的记录，其余变体返回空切片。
    pub fn attempts(&self) -> &[ResolveAttempt] {
        match self {
            ConduitError::ResolutionFailed { attempts, .. } => attempts,
            _ => &[],
        }
    }
}

/// 一次失败的建连尝试。
#[derive(Debug)]
pub struct ResolveAttempt {
    pub protocol: Arc<str>,
    pub priority: i32,
    pub error: ConduitError,
}

impl fmt::Display for ResolveAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (priority {}): {}",
            self.protocol, self.priority, self.error
        )
    }
}
