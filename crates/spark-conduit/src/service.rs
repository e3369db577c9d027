//! # service 模块说明
//!
//! ## 角色定位（Why）
//! - 所有协议在服务端都暴露同一套三阶段生命周期：`init → accept* → stop`；
//! - Serve Loop 只依赖本模块的类型，不感知监听的是 TCP 端口、Unix 套接字还是分层协议。
//!
//! ## 状态机（What）
//! - `Uninitialized --init--> Initialized --stop--> Stopped`；
//! - `init` 失败即终止，不会再有 `accept`；
//! - `stop` 消费状态，借助所有权保证每份状态至多停止一次。

use std::{fmt, sync::Arc};

use async_trait::async_trait;

use crate::{
    error::{ConduitError, Result, TransportError},
    flow::Flow,
    protocol::Protocol,
    registry::ProtocolWitness,
};

/// 协议的服务端实现。
///
/// # 教案式说明
/// - **意图 (Why)**：把“绑定监听、接受连接、释放监听”抽象为三个操作，
///   由 [`ServiceDescriptor`] 统一包装错误并把连接擦除为 [`Flow`]；
/// - **契约 (What)**：
///   - `init`：根据配置建立监听状态；
///   - `accept`：等待下一条连接；返回 [`TransportError::Closed`] 表示监听已被有意关闭（优雅停机），
///     其余错误视为致命；
///   - `stop`：释放状态，调用后状态不可再用；
/// - **前置条件**：`State` 需要 `Sync`，因为 `accept` 以共享借用跨越挂起点。
#[async_trait]
pub trait Service: Send + Sync + 'static {
    type Protocol: Protocol;
    type Configuration: Send + 'static;
    type State: Send + Sync + 'static;

    async fn init(&self, config: Self::Configuration) -> Result<Self::State, TransportError>;

    async fn accept(
        &self,
        state: &Self::State,
    ) -> Result<<Self::Protocol as Protocol>::Flow, TransportError>;

    async fn stop(&self, state: Self::State) -> Result<(), TransportError>;
}

/// 服务实现与其协议见证者的绑定。
pub struct ServiceDescriptor<S: Service> {
    name: Arc<str>,
    service: Arc<S>,
    protocol: ProtocolWitness<S::Protocol>,
}

impl<S: Service> ServiceDescriptor<S> {
    /// 以协议名作为服务名构造描述符。
    pub fn new(protocol: &ProtocolWitness<S::Protocol>, service: S) -> Self {
        Self {
            name: Arc::clone(protocol.shared_name()),
            service: Arc::new(service),
            protocol: protocol.clone(),
        }
    }

    /// 覆盖用于诊断的服务名。
    pub fn with_name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service(&self) -> &Arc<S> {
        &self.service
    }

    pub fn protocol(&self) -> &ProtocolWitness<S::Protocol> {
        &self.protocol
    }

    /// 执行 `init`，成功后得到持有状态的 [`InitializedService`]。
    pub async fn init(&self, config: S::Configuration) -> Result<InitializedService<S>> {
        let state = self
            .service
            .init(config)
            .await
            .map_err(|source| ConduitError::ServiceInitFailed {
                service: Arc::clone(&self.name),
                source,
            })?;
        Ok(InitializedService {
            descriptor: self.clone(),
            state,
        })
    }
}

impl<S: Service> Clone for ServiceDescriptor<S> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            service: Arc::clone(&self.service),
            protocol: self.protocol.clone(),
        }
    }
}

impl<S: Service> fmt::Debug for ServiceDescriptor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("name", &self.name)
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

/// 已初始化、独占持有状态的服务。
pub struct InitializedService<S: Service> {
    descriptor: ServiceDescriptor<S>,
    state: S::State,
}

impl<S: Service> InitializedService<S> {
    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn state(&self) -> &S::State {
        &self.state
    }

    /// 接受下一条连接。
    ///
    /// 返回 `Ok(None)` 表示优雅关闭，`Err` 为致命的 [`ConduitError::ServiceAcceptFailed`]。
    pub async fn accept(&self) -> Result<Option<Flow>> {
        match self.descriptor.service.accept(&self.state).await {
            Ok(flow) => Ok(Some(self.descriptor.protocol.wrap(flow))),
            Err(TransportError::Closed) => Ok(None),
            Err(source) => Err(ConduitError::ServiceAcceptFailed {
                service: Arc::clone(&self.descriptor.name),
                source,
            }),
        }
    }

    /// 停止服务并消费状态。
    pub async fn stop(self) -> Result<()> {
        let InitializedService { descriptor, state } = self;
        descriptor
            .service
            .stop(state)
            .await
            .map_err(|source| ConduitError::ServiceStopFailed {
                service: Arc::clone(&descriptor.name),
                source,
            })
    }
}

impl<S: Service> fmt::Debug for InitializedService<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitializedService")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}
