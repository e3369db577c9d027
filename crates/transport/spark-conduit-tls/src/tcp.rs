//! TLS over TCP：以 `spark-conduit-tokio` 的 TCP 协议为基础协议的派生协议。

use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};

use rustls::ClientConfig;
use spark_conduit::{
    Layered, LayeredService, ProtocolWitness, Resolve, ServiceDescriptor, Witness, optional,
    required, with_default,
};
use spark_conduit_tokio::{Tcp, TcpClientOptions, TcpEndpoint, TcpService, TokioRuntime, tcp};
use tracing::debug;

use crate::{
    config::TlsClientParams,
    register_over,
    session::RustlsLayer,
    witness::{client_config, server_name},
};

pub type TlsTcp = Layered<Tcp, RustlsLayer>;

pub type TlsTcpEndpoint = (TcpEndpoint, TlsClientParams);

/// [`service`] 使用的服务端握手时限。
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// 在进程级注册表中注册 TLS over TCP（名称 `tls+tcp`）；重复调用返回同一对见证者。
pub fn register() -> (Witness<TlsTcpEndpoint>, ProtocolWitness<TlsTcp>) {
    static REGISTERED: OnceLock<(Witness<TlsTcpEndpoint>, ProtocolWitness<TlsTcp>)> =
        OnceLock::new();
    REGISTERED
        .get_or_init(|| register_over(&tcp::register().1))
        .clone()
}

/// `(host, port, nodelay, client_config, server_name?)` → DNS 查询 → TLS 端点。
///
/// # 教案式说明
/// - **契约 (What)**：缺少主机、端口或客户端配置时不适用；`server_name` 缺省取 `host`；
///   服务器名不合法或 DNS 查询失败同样视为不适用，原因以 `debug!` 记录；
/// - **风险 (Trade-offs)**：以 IP 字面量作为主机且不提供 `server_name` 时，
///   证书必须包含对应的 IP SAN 才能通过校验。
pub fn resolver() -> Resolve<TlsTcpEndpoint> {
    Resolve::new(
        (
            required(tcp::host()),
            required(tcp::port()),
            with_default(tcp::nodelay(), true),
            required(client_config()),
            optional(server_name()),
        ),
        |(host, port, nodelay, config, name): (
            String,
            u16,
            bool,
            Arc<ClientConfig>,
            Option<String>,
        )| async move {
            let name = name.unwrap_or_else(|| host.clone());
            let params = match TlsClientParams::new(config, &name) {
                Ok(params) => params,
                Err(err) => {
                    debug!(server_name = %name, error = %err, "tls resolver not applicable");
                    return None;
                }
            };
            let options = TcpClientOptions::default().with_nodelay(nodelay);
            let endpoint = tcp::lookup(&host, port, options).await?;
            Some((endpoint, params))
        },
    )
}

/// 以已注册的 TLS over TCP 协议构造服务描述符；服务配置为 `(TcpServerConfig, HotReloadingServerConfig)`。
///
/// 每条连接的服务端握手限时 [`DEFAULT_HANDSHAKE_TIMEOUT`]。
pub fn service() -> ServiceDescriptor<LayeredService<TcpService, RustlsLayer>> {
    service_with_handshake_timeout(DEFAULT_HANDSHAKE_TIMEOUT)
}

/// 同 [`service`]，握手时限由调用方指定；计时使用调用 `accept` 时所在的 Tokio 运行时。
pub fn service_with_handshake_timeout(
    timeout: Duration,
) -> ServiceDescriptor<LayeredService<TcpService, RustlsLayer>> {
    let (_, witness) = register();
    let service = witness
        .protocol()
        .service(TcpService)
        .with_handshake_timeout(Arc::new(TokioRuntime::ambient()), timeout);
    ServiceDescriptor::new(&witness, service)
}
