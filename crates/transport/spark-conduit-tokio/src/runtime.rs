use std::time::Duration;

use spark_conduit::{BoxFuture, Runtime, async_trait};
use tokio::runtime::Handle;

/// 基于 Tokio 句柄的 [`Runtime`] 绑定。
///
/// # 教案式说明
/// - **意图 (Why)**：Serve Loop 只需要“派发”与“睡眠”，持有 [`Handle`] 即可在任意线程上派发任务，
///   不要求调用方处在 Tokio 上下文中；
/// - **契约 (What)**：`spawn_dyn` 派发的任务与调用方解耦，其 `JoinHandle` 被立即丢弃；
///   任务 panic 仅影响自身；
/// - **风险 (Trade-offs)**：运行时关闭后派发的任务会被静默丢弃；
///   [`TokioRuntime::ambient`] 不持有句柄，使用时必须处在 Tokio 上下文中。
#[derive(Clone, Debug)]
pub struct TokioRuntime {
    handle: Option<Handle>,
}

impl TokioRuntime {
    /// 绑定当前所在的 Tokio 运行时。
    ///
    /// # Panics
    /// 不在 Tokio 运行时上下文中调用时 panic，与 [`Handle::current`] 一致。
    pub fn current() -> Self {
        Self::from_handle(Handle::current())
    }

    /// 不绑定句柄，派发与计时都使用调用时所在的 Tokio 运行时。
    ///
    /// 可在运行时之外构造，例如进程级的服务描述符。
    pub fn ambient() -> Self {
        Self { handle: None }
    }

    /// 绑定当前运行时；不在运行时上下文中时返回 `None`。
    pub fn try_current() -> Option<Self> {
        Handle::try_current().ok().map(Self::from_handle)
    }

    pub fn from_handle(handle: Handle) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    /// 绑定的句柄；[`TokioRuntime::ambient`] 返回 `None`。
    pub fn handle(&self) -> Option<&Handle> {
        self.handle.as_ref()
    }
}

#[async_trait]
impl Runtime for TokioRuntime {
    fn spawn_dyn(&self, task: BoxFuture<'static, ()>) {
        match &self.handle {
            Some(handle) => drop(handle.spawn(task)),
            None => drop(tokio::spawn(task)),
        }
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
