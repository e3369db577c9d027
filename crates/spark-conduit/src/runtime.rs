use std::{future::Future, time::Duration};

use async_trait::async_trait;

use crate::BoxFuture;

/// Serve Loop 依赖的最小运行时能力：派发独立任务与计时。
///
/// # 设计背景（Why）
/// - 核心不绑定任何具体异步运行时，除 `async`/`.await` 与 `select` 竞速外，
///   只有“派发”和“睡眠”两项能力需要宿主提供；
/// - 每个运行时一份绑定，例如 `spark-conduit-tokio` 中的 `TokioRuntime`。
///
/// # 契约说明（What）
/// - `spawn_dyn`：任务与调用方完全解耦，调用方不会等待、也不会取消它；
///   任务内的失败不得影响调用方；
/// - `sleep`：在给定时长后完成；被丢弃时应释放计时资源；
/// - **前置条件**：实现需 `Send + Sync + 'static`，以便在多个 Serve Loop 间共享。
///
/// # 风险提示（Trade-offs）
/// - 不返回 JoinHandle：Serve Loop 从不 join 处理任务，省去句柄的类型擦除与分配。
#[async_trait]
pub trait Runtime: Send + Sync + 'static {
    /// 对象安全的派发入口。
    fn spawn_dyn(&self, task: BoxFuture<'static, ()>);

    /// 泛型派发入口，装箱后委托给 [`Runtime::spawn_dyn`]。
    fn spawn<F>(&self, task: F)
    where
        Self: Sized,
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn_dyn(Box::pin(task));
    }

    async fn sleep(&self, duration: Duration);
}

#[async_trait]
impl<R: Runtime + ?Sized> Runtime for std::sync::Arc<R> {
    fn spawn_dyn(&self, task: BoxFuture<'static, ()>) {
        (**self).spawn_dyn(task);
    }

    async fn sleep(&self, duration: Duration) {
        (**self).sleep(duration).await;
    }
}
