#![doc = r#"
# spark-conduit

## 设计动机（Why）
- **定位**：传输无关的建连层核心。应用代码只面向抽象 [`Flow`] 编写一次协议逻辑，
  具体由明文 TCP、TLS over TCP、Unix 套接字还是外部实现承载字节，在配置期决定。
- **架构角色**：本 crate 只定义契约与引擎：见证者与上下文、协议注册中心、解析表、
  服务生命周期、Serve Loop 与分层引擎；具体传输位于 `spark-conduit-tokio`、
  `spark-conduit-tls` 等实现 crate。
- **设计理念**：类型安全贯穿始终。上下文按见证者存取、Flow 凭协议见证者解包，
  调用点从不手写类型转换。

## 核心契约（What）
- **客户端**：以 [`Context`] 描述目的地，[`ResolverTable`] 按优先级依次尝试，
  成功得到带出身标记的 [`Flow`]，全部失败得到 [`ConduitError::ResolutionFailed`]；
- **服务端**：[`Service`] 提供 `init/accept/stop`，[`serve`] 负责竞速、派发与收尾；
- **分层**：[`Layered`] 把任意 [`Layer`] 套在已注册协议之上，派生出新的协议与服务。

## 实现策略（How）
- **运行时无关**：核心只依赖 `async`/`.await`、`futures::future::select` 与 [`Runtime`]
  提供的 `spawn`/`sleep`；
- **错误分层**：协议实现报告 [`TransportError`]，核心映射为带协议名与阶段的 [`ConduitError`]；
- **可观测性**：关键路径以 `tracing` 输出结构化日志。

## 风险与考量（Trade-offs）
- **注册时机**：注册表由单把读写锁保护，注册应在解析与服务开始前完成；
- **取消语义**：停止与超时是协作式的，已派发的处理任务不会被等待或取消。
"#]

pub mod context;
pub mod error;
pub mod flow;
pub mod layering;
pub mod protocol;
pub mod registry;
pub mod resolver;
pub mod runtime;
pub mod serve;
pub mod service;
pub mod witness;

pub use async_trait::async_trait;
pub use futures::future::BoxFuture;

pub use context::Context;
pub use error::{BoxError, ConduitError, FlowStage, ResolveAttempt, Result, TransportError};
pub use flow::Flow;
pub use layering::{Layer, Layered, LayeredFlow, LayeredService, LayeredState, Session};
pub use protocol::{Protocol, Received};
pub use registry::{ProtocolId, ProtocolInfo, ProtocolRegistry, ProtocolWitness, register};
pub use resolver::{
    Extract, Optional, Required, Resolve, ResolverEntry, ResolverTable, ResolverTableBuilder,
    WithDefault, optional, required, resolve, with_default,
};
pub use runtime::Runtime;
pub use serve::{ServeExit, ServeOptions, StopSignal, StopTrigger, serve};
pub use service::{InitializedService, Service, ServiceDescriptor};
pub use witness::{Witness, WitnessId};
