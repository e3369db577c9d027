//! # config 模块说明
//!
//! ## 角色定位（Why）
//! - TCP 与 Unix 服务的监听参数、客户端套接字选项都可以来自 TOML 配置文件，
//!   也可以在代码中直接构造；
//! - 套接字选项（`TCP_NODELAY`、`SO_LINGER`）集中在 [`TcpClientOptions`]，
//!   建连与接受两侧共用，避免调用方直接操作 `socket2`。
//!
//! ## 文件格式（What）
//! ```toml
//! bind = "127.0.0.1:9000"
//! backlog = 512
//! nodelay = true
//! linger_ms = 2000
//! ```

use std::{
    fs, io,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, de::DeserializeOwned};
use socket2::SockRef;
use thiserror::Error;

/// 配置加载失败。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

const DEFAULT_BACKLOG: i32 = 1024;

fn default_backlog() -> i32 {
    DEFAULT_BACKLOG
}

fn default_nodelay() -> bool {
    true
}

/// 每条 TCP 连接上应用的套接字选项。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把“优雅关闭需等待对端、超时后以 RST 释放资源”的策略显式配置化；
/// - 客户端建连与服务端接受共用同一份选项，保证两侧关闭行为一致。
///
/// ## 契约（What）
/// - `nodelay`：是否关闭 Nagle 算法，默认 `true`；
/// - `linger_ms`：`SO_LINGER` 毫秒数，`None` 沿用内核默认；
/// - **后置条件**：`apply` 返回 `Ok(())` 时选项已落地到内核。
///
/// ## 风险（Trade-offs）
/// - Linux 会把 linger 向下取整到秒，过小的值可能导致发送缓冲中的数据被 RST 丢弃。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TcpClientOptions {
    pub nodelay: bool,
    pub linger_ms: Option<u64>,
}

impl Default for TcpClientOptions {
    fn default() -> Self {
        Self {
            nodelay: default_nodelay(),
            linger_ms: None,
        }
    }
}

impl TcpClientOptions {
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn with_linger(mut self, linger: Option<Duration>) -> Self {
        self.linger_ms = linger.map(|value| value.as_millis() as u64);
        self
    }

    pub fn linger(&self) -> Option<Duration> {
        self.linger_ms.map(Duration::from_millis)
    }

    pub(crate) fn apply(&self, stream: &tokio::net::TcpStream) -> io::Result<()> {
        stream.set_nodelay(self.nodelay)?;
        SockRef::from(stream).set_linger(self.linger())
    }
}

/// TCP 服务的监听配置。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TcpServerConfig {
    pub bind: SocketAddr,
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    #[serde(default = "default_nodelay")]
    pub nodelay: bool,
    #[serde(default)]
    pub linger_ms: Option<u64>,
}

impl TcpServerConfig {
    pub fn new(bind: SocketAddr) -> Self {
        Self {
            bind,
            backlog: DEFAULT_BACKLOG,
            nodelay: default_nodelay(),
            linger_ms: None,
        }
    }

    pub fn with_backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    /// 接受到的连接继承的套接字选项。
    pub fn accepted_options(&self) -> TcpClientOptions {
        TcpClientOptions {
            nodelay: self.nodelay,
            linger_ms: self.linger_ms,
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        from_toml_str(text)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        from_toml_file(path.as_ref())
    }
}

/// Unix 套接字服务的监听配置。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnixServerConfig {
    pub path: PathBuf,
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// 绑定前删除遗留的套接字文件。
    #[serde(default)]
    pub remove_stale: bool,
}

impl UnixServerConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            backlog: DEFAULT_BACKLOG,
            remove_stale: false,
        }
    }

    pub fn with_remove_stale(mut self, remove_stale: bool) -> Self {
        self.remove_stale = remove_stale;
        self
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        from_toml_str(text)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        from_toml_file(path.as_ref())
    }
}

impl TcpClientOptions {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        from_toml_str(text)
    }
}

fn from_toml_str<T: DeserializeOwned>(text: &str) -> Result<T, ConfigError> {
    Ok(toml::from_str(text)?)
}

fn from_toml_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    from_toml_str(&text)
}
