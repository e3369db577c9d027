use std::{fmt, sync::Arc};

use arc_swap::ArcSwap;
use rustls::ServerConfig;
use tracing::info;

use crate::config::{TlsServerFiles, TlsSetupError};

/// TLS 服务端配置的热更新容器。
///
/// # 设计动机（Why）
/// - **零中断目标**：证书轮换时无需停止 Serve Loop 或重建监听器；
/// - **架构角色**：作为 [`RustlsLayer`](crate::RustlsLayer) 的服务端配置，
///   每条新连接创建会话时读取一次当前快照。
///
/// # 核心契约（What）
/// - **前置条件**：写入的 `ServerConfig` 必须已完成证书链与私钥的装载；
/// - **后置条件**：`replace` 立即对之后的握手可见，已建立或正在握手的连接继续持有旧快照。
///
/// # 实现逻辑（How）
/// - `ArcSwap` 提供读无锁、写常数时间的 RCU 式替换；
/// - 克隆只复制外层 `Arc`，所有克隆共享同一个交换容器。
///
/// # 风险提示（Trade-offs & Gotchas）
/// - 高频更新会暂存多个 `Arc<ServerConfig>`，直到引用它们的连接全部结束。
#[derive(Clone)]
pub struct HotReloadingServerConfig {
    inner: Arc<ArcSwap<ServerConfig>>,
}

impl HotReloadingServerConfig {
    pub fn new(initial: Arc<ServerConfig>) -> Self {
        Self {
            inner: Arc::new(ArcSwap::new(initial)),
        }
    }

    #[inline]
    pub fn from_config(initial: ServerConfig) -> Self {
        Self::new(Arc::new(initial))
    }

    /// 从证书文件构造。
    pub fn from_files(files: &TlsServerFiles) -> Result<Self, TlsSetupError> {
        Ok(Self::from_config(files.load()?))
    }

    /// 当前配置的共享快照；快照不会随之后的替换而改变。
    #[inline]
    pub fn snapshot(&self) -> Arc<ServerConfig> {
        self.inner.load_full()
    }

    /// 原子替换当前配置并返回旧值。
    #[inline]
    pub fn replace(&self, next: Arc<ServerConfig>) -> Arc<ServerConfig> {
        self.inner.swap(next)
    }

    /// 重新读取证书文件并替换当前配置。
    ///
    /// 读取或解析失败时保留原配置不变。
    pub fn reload(&self, files: &TlsServerFiles) -> Result<Arc<ServerConfig>, TlsSetupError> {
        let next = Arc::new(files.load()?);
        let previous = self.replace(next);
        info!(cert_chain = %files.cert_chain.display(), "tls server config reloaded");
        Ok(previous)
    }
}

impl fmt::Debug for HotReloadingServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HotReloadingServerConfig")
            .finish_non_exhaustive()
    }
}
