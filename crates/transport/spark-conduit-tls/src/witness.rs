use std::sync::{Arc, LazyLock};

use rustls::ClientConfig;
use spark_conduit::Witness;

static CLIENT_CONFIG: LazyLock<Witness<Arc<ClientConfig>>> =
    LazyLock::new(|| Witness::new("tls.client_config"));
static SERVER_NAME: LazyLock<Witness<String>> = LazyLock::new(|| Witness::new("tls.server_name"));

/// 客户端 TLS 配置（信任根、ALPN 等）。
pub fn client_config() -> &'static Witness<Arc<ClientConfig>> {
    &CLIENT_CONFIG
}

/// 用于 SNI 与证书校验的服务器名；缺省时取基础协议的主机名。
pub fn server_name() -> &'static Witness<String> {
    &SERVER_NAME
}
