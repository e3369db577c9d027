#![doc = r#"
# spark-conduit-tokio

## 设计动机（Why）
- **定位**：`spark-conduit` 在 Tokio 运行时上的具体绑定，提供 Serve Loop 所需的
  [`TokioRuntime`]，以及明文 TCP 与 Unix 域套接字两种协议/服务实现。
- **架构角色**：作为传输实现层的基础积木，TLS 等分层协议以这里注册的协议为基础协议。

## 核心契约（What）
- **协议**：[`tcp::Tcp`] 与 [`unix::Unix`] 实现核心 `Protocol`，连接为
  [`tcp::TcpFlow`] / [`unix::UnixFlow`]；
- **服务**：[`tcp::TcpService`] 与 [`unix::UnixService`] 实现三阶段生命周期，
  监听参数来自 [`config`] 中可由 TOML 加载的配置；
- **解析**：`tcp::resolver()` 以 `tcp::host()`/`tcp::port()` 见证者做 DNS 查询，
  `unix::resolver()` 直接使用 `unix::path()`；
- **前置约束**：所有操作必须在 Tokio 运行时中执行。

## 实现策略（How）
- 监听套接字经 `socket2` 创建，以便设置 backlog 与 `SO_REUSEADDR`；
- 每条连接的 `TCP_NODELAY`/`SO_LINGER` 由 [`config::TcpClientOptions`] 统一落地；
- 读写直接基于 `AsyncReadExt`/`AsyncWriteExt`，`close` 执行写半关闭。

## 风险与考量（Trade-offs）
- `SO_LINGER` 在 Linux 上按秒取整；
- DNS 失败被视为“解析器不适用”而非错误，失败原因只出现在 `debug!` 日志中。
"#]

pub mod config;
mod io;
pub mod runtime;
pub mod tcp;
#[cfg(unix)]
pub mod unix;

pub use config::{ConfigError, TcpClientOptions, TcpServerConfig, UnixServerConfig};
pub use runtime::TokioRuntime;
pub use tcp::{Tcp, TcpEndpoint, TcpFlow, TcpListenerState, TcpService};
#[cfg(unix)]
pub use unix::{Unix, UnixFlow, UnixListenerState, UnixService};
