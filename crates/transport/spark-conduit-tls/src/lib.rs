#![doc = r#"
# spark-conduit-tls

## 设计动机（Why）
- **定位**：为 `spark-conduit` 的分层机制提供基于 `rustls` 的 TLS 会话层，
  可以叠加在任何已注册的基础协议之上（TCP、Unix 域套接字或调用方自带的传输）。
- **架构角色**：本 crate 只实现会话状态机与配置装配，建连、收发、关闭全部经由
  基础协议完成，Serve Loop 与解析器对 TLS 一无所知。

## 核心契约（What）
- [`RustlsLayer`] 实现核心 `Layer`：客户端配置为 [`TlsClientParams`]，
  服务端配置为 [`HotReloadingServerConfig`]；
- [`register_over`] 以 `tls+<基础协议名>` 注册派生协议；
- [`tcp`] 模块提供现成的 TLS over TCP：注册、解析函数与服务描述符；
- 见证者 [`client_config()`] 与 [`server_name()`] 为解析函数提供 TLS 参数。

## 实现策略（How）
- 会话只在内存中搬运字节：`read_tls`/`process_new_packets` 消化密文，
  `write_tls` 产出待发记录；
- 服务端配置放在 `ArcSwap` 中，证书轮换对之后的握手立即生效。

## 风险与考量（Trade-offs）
- 加密后端固定为 `ring`；
- 服务端握手在 `accept` 内串行完成，慢速客户端会推迟后续连接的接受，
  [`tcp::service`] 以握手时限兜住沉默的客户端。
"#]

pub mod config;
pub mod hot_reload;
pub mod session;
pub mod tcp;
mod witness;

use spark_conduit::{Layered, Protocol, ProtocolWitness, Witness, register};

pub use config::{
    TlsClientFiles, TlsClientParams, TlsServerFiles, TlsSetupError,
    client_config as build_client_config, server_config as build_server_config,
};
pub use hot_reload::HotReloadingServerConfig;
pub use session::{RustlsLayer, RustlsSession};
pub use witness::{client_config, server_name};

/// 叠加在基础协议 `B` 之上的 TLS 协议。
pub type TlsOver<B> = Layered<B, RustlsLayer>;

/// 以 `tls+<基础协议名>` 注册叠加在 `base` 之上的 TLS 协议。
///
/// 每次调用都会注册一个新的协议；需要稳定见证者的调用方应自行缓存结果，
/// 如 [`tcp::register`]。
pub fn register_over<B: Protocol>(
    base: &ProtocolWitness<B>,
) -> (
    Witness<(B::Endpoint, TlsClientParams)>,
    ProtocolWitness<TlsOver<B>>,
) {
    register(
        format!("tls+{}", base.name()),
        Layered::new(base, RustlsLayer),
    )
}
