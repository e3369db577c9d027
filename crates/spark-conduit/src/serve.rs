//! # serve 模块说明
//!
//! ## 角色定位（Why）
//! - 把一个 [`ServiceDescriptor`] 变成长期运行的接入循环：初始化、反复接受连接并派发给处理函数、
//!   在超时/停止信号/优雅关闭时收尾；
//! - 处理函数在独立任务中运行，单个连接的失败永远不会中断循环。
//!
//! ## 终止语义（What）
//! - 所有终止路径都恰好调用一次 `stop`；
//! - 接受路径的错误优先于 `stop` 的错误返回，后者以 `warn!` 记录；
//! - 接受路径正常结束时，`stop` 的错误作为结果返回。

use std::{fmt, future::Future, pin::pin, time::Duration};

use futures::{
    FutureExt,
    channel::oneshot,
    future::{self, Either},
};
use tracing::{debug, error, info, warn};

use crate::{
    BoxFuture,
    error::Result,
    flow::Flow,
    runtime::Runtime,
    service::{Service, ServiceDescriptor},
};

/// 外部停止信号：完成即要求 Serve Loop 停止接受新连接。
pub struct StopSignal {
    inner: BoxFuture<'static, ()>,
}

impl StopSignal {
    /// 以任意 Future 作为停止信号。
    pub fn new(signal: impl Future<Output = ()> + Send + 'static) -> Self {
        Self {
            inner: signal.boxed(),
        }
    }

    /// 永不触发的信号。
    pub fn never() -> Self {
        Self::new(future::pending())
    }

    /// 创建一对触发器与信号；触发器被丢弃而未触发时，信号保持挂起。
    pub fn channel() -> (StopTrigger, StopSignal) {
        let (tx, rx) = oneshot::channel();
        let signal = Self::new(async move {
            if rx.await.is_err() {
                future::pending::<()>().await;
            }
        });
        (StopTrigger { tx }, signal)
    }
}

impl fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopSignal").finish_non_exhaustive()
    }
}

/// [`StopSignal::channel`] 的触发端。
#[derive(Debug)]
pub struct StopTrigger {
    tx: oneshot::Sender<()>,
}

impl StopTrigger {
    pub fn trigger(self) {
        // 信号端已被丢弃说明循环已经结束，无需再通知。
        let _ = self.tx.send(());
    }
}

/// Serve Loop 的可选参数。
///
/// - `timeout`：单次等待连接的空闲上限，每轮重新计时；
/// - `stop`：外部停止信号。
#[derive(Debug, Default)]
pub struct ServeOptions {
    timeout: Option<Duration>,
    stop: Option<StopSignal>,
}

impl ServeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_stop(mut self, stop: StopSignal) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// Serve Loop 正常结束的原因。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServeExit {
    /// 停止信号触发。
    Stopped,
    /// 等待连接超时。
    TimedOut,
    /// 服务报告优雅关闭。
    Closed,
}

impl fmt::Display for ServeExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ServeExit::Stopped => "stopped",
            ServeExit::TimedOut => "timed out",
            ServeExit::Closed => "closed",
        };
        f.write_str(label)
    }
}

/// 运行服务直到超时、停止信号、优雅关闭或致命错误。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 服务端只需提供 `init/accept/stop` 与一个处理函数，循环、竞速、派发与收尾由本函数统一完成。
///
/// ## 逻辑（How）
/// 1. `init` 失败直接返回 `ServiceInitFailed`，此时没有状态可停止；
/// 2. 每轮以 `select` 竞速三方：停止信号、`accept`、空闲计时；停止信号放在最左侧，
///    同时就绪时优先生效；落败的 `accept` 与计时 Future 随即被丢弃；
/// 3. 得到连接则通过 [`Runtime::spawn_dyn`] 派发 `handler(flow)`，立即进入下一轮；
/// 4. 退出循环后调用一次 `stop`，再按错误优先级合成结果。
///
/// ## 契约（What）
/// - 返回 `Ok(ServeExit)` 表示正常结束；
/// - 已派发的处理任务既不会被等待，也不会被取消；
/// - **前置条件**：`accept` 被丢弃时不得遗留半接受的连接，具体协议需保证取消安全。
///
/// ## 风险（Trade-offs）
/// - 超时是“空闲超时”：每轮重新计时，持续有连接到来时循环不会因超时结束。
pub async fn serve<S, R, H, Fut>(
    runtime: &R,
    descriptor: &ServiceDescriptor<S>,
    config: S::Configuration,
    options: ServeOptions,
    handler: H,
) -> Result<ServeExit>
where
    S: Service,
    R: Runtime + ?Sized,
    H: Fn(Flow) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    let service = descriptor.init(config).await?;
    info!(service = %descriptor.name(), "service initialized");

    let ServeOptions { timeout, stop } = options;
    let mut stop = stop.unwrap_or_else(StopSignal::never).inner;

    let outcome = loop {
        let accept = pin!(service.accept());
        let idle: BoxFuture<'_, ()> = match timeout {
            Some(duration) => runtime.sleep(duration),
            None => future::pending().boxed(),
        };

        match future::select(&mut stop, future::select(accept, idle)).await {
            Either::Left(((), _)) => break Ok(ServeExit::Stopped),
            Either::Right((Either::Right(((), _)), _)) => break Ok(ServeExit::TimedOut),
            Either::Right((Either::Left((accepted, _)), _)) => match accepted {
                Ok(Some(flow)) => {
                    debug!(service = %descriptor.name(), protocol = flow.protocol_name(), "flow accepted");
                    runtime.spawn_dyn(Box::pin(handler(flow)));
                }
                Ok(None) => break Ok(ServeExit::Closed),
                Err(err) => {
                    error!(service = %descriptor.name(), error = %err, "accept failed");
                    break Err(err);
                }
            },
        }
    };

    let stopped = service.stop().await;
    match (outcome, stopped) {
        (Ok(exit), Ok(())) => {
            info!(service = %descriptor.name(), reason = %exit, "service stopped");
            Ok(exit)
        }
        (Ok(_), Err(err)) => {
            error!(service = %descriptor.name(), error = %err, "stop failed");
            Err(err)
        }
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(stop_err)) => {
            warn!(service = %descriptor.name(), error = %stop_err, "stop failed after accept error");
            Err(err)
        }
    }
}
