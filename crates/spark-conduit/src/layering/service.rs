use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{Layer, Layered, LayeredFlow};
use crate::{error::TransportError, protocol::Protocol, runtime::Runtime, service::Service};

/// 在基础服务之上完成服务端握手的派生服务。
///
/// # 教案式说明
/// - **意图 (Why)**：派生协议的服务端与客户端对称，监听、接受、停止仍由基础服务完成，
///   本类型只在每条接受到的连接上追加服务端握手；
/// - **契约 (What)**：
///   - 配置为 `(基础配置, 服务端会话配置)`；
///   - 单条连接的握手失败会关闭该连接、记录 `warn!` 并继续接受下一条，
///     只有基础 `accept` 的错误（包括优雅关闭）会抵达 Serve Loop；
///   - 配置了握手时限（[`LayeredService::with_handshake_timeout`]）时，
///     超时与握手失败同样处理：关闭该连接并继续接受；
///   - `stop` 直接委托给基础服务；
/// - **风险 (Trade-offs)**：握手在 `accept` 内串行完成，未设时限时一个沉默的客户端会阻塞后续连接；
///   停止信号会在握手中途丢弃该 Future，正在握手的连接随之被丢弃。
pub struct LayeredService<S: Service, L: Layer> {
    layered: Layered<S::Protocol, L>,
    base: S,
    handshake_deadline: Option<HandshakeDeadline>,
}

struct HandshakeDeadline {
    runtime: Arc<dyn Runtime>,
    timeout: Duration,
}

impl<S: Service, L: Layer> LayeredService<S, L> {
    pub(super) fn new(layered: Layered<S::Protocol, L>, base: S) -> Self {
        Self {
            layered,
            base,
            handshake_deadline: None,
        }
    }

    /// 为每条连接的服务端握手设置时限，计时由 `runtime` 提供。
    pub fn with_handshake_timeout(mut self, runtime: Arc<dyn Runtime>, timeout: Duration) -> Self {
        self.handshake_deadline = Some(HandshakeDeadline { runtime, timeout });
        self
    }

    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_deadline.as_ref().map(|deadline| deadline.timeout)
    }

    pub fn base(&self) -> &S {
        &self.base
    }
}

impl<S: Service, L: Layer> fmt::Debug for LayeredService<S, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayeredService")
            .field("layered", &self.layered)
            .field("handshake_timeout", &self.handshake_timeout())
            .finish_non_exhaustive()
    }
}

/// [`LayeredService`] 的运行状态。
pub struct LayeredState<S: Service, L: Layer> {
    base: S::State,
    server: L::ServerConfig,
}

impl<S: Service, L: Layer> LayeredState<S, L> {
    pub fn base(&self) -> &S::State {
        &self.base
    }

    pub fn server_config(&self) -> &L::ServerConfig {
        &self.server
    }
}

#[async_trait]
impl<S: Service, L: Layer> Service for LayeredService<S, L> {
    type Protocol = Layered<S::Protocol, L>;
    type Configuration = (S::Configuration, L::ServerConfig);
    type State = LayeredState<S, L>;

    async fn init(&self, config: Self::Configuration) -> Result<Self::State, TransportError> {
        let (base, server) = config;
        let base = self.base.init(base).await?;
        Ok(LayeredState { base, server })
    }

    async fn accept(
        &self,
        state: &Self::State,
    ) -> Result<LayeredFlow<S::Protocol, L>, TransportError> {
        let base_name = self.layered.base().name();
        loop {
            let mut flow = self.base.accept(&state.base).await?;
            let session = match self.layered.layer().server_session(&state.server) {
                Ok(session) => session,
                Err(err) => {
                    warn!(base = base_name, error = %err, "server session setup failed, closing base flow");
                    if let Err(close_err) = self.layered.base().protocol().close(&mut flow).await {
                        debug!(base = base_name, error = %close_err, "base close after failed session setup");
                    }
                    continue;
                }
            };
            let deadline = self
                .handshake_deadline
                .as_ref()
                .map(|deadline| deadline.runtime.sleep(deadline.timeout));
            match self.layered.establish(flow, session, deadline).await {
                Ok(flow) => return Ok(flow),
                // `establish` 已关闭基础连接并记录日志。
                Err(_) => continue,
            }
        }
    }

    async fn stop(&self, state: Self::State) -> Result<(), TransportError> {
        self.base.stop(state.base).await
    }
}
