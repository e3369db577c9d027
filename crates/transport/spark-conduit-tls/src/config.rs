//! # config 模块说明
//!
//! ## 角色定位（Why）
//! - 负责把 PEM 证书、私钥与 ALPN 列表装配为 `rustls` 的客户端/服务端配置；
//! - 文件路径等参数可来自 TOML，与 `spark-conduit-tokio` 的监听配置放在同一份文件中管理。
//!
//! ## 文件格式（What）
//! ```toml
//! cert_chain = "/etc/conduit/server.pem"
//! private_key = "/etc/conduit/server.key"
//! alpn = ["conduit/1"]
//! ```
//!
//! ## 风险与考量（Trade-offs）
//! - 加密后端固定为 `ring`，协议版本使用 `rustls` 的安全默认值（TLS 1.2 与 1.3）。

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use rustls::{ClientConfig, RootCertStore, ServerConfig, crypto::CryptoProvider};
use rustls_pki_types::{
    CertificateDer, PrivateKeyDer, ServerName,
    pem::{self, PemObject},
};
use serde::{Deserialize, de::DeserializeOwned};
use thiserror::Error;

/// TLS 配置装配失败。
#[derive(Debug, Error)]
pub enum TlsSetupError {
    #[error("failed to read config file `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid tls config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to load PEM from `{path}`: {source}")]
    Pem {
        path: PathBuf,
        #[source]
        source: pem::Error,
    },
    #[error("no certificate found in `{0}`")]
    EmptyChain(PathBuf),
    #[error("invalid server name `{0}`")]
    InvalidServerName(String),
    #[error(transparent)]
    Rustls(#[from] rustls::Error),
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn alpn_protocols(alpn: &[String]) -> Vec<Vec<u8>> {
    alpn.iter().map(|p| p.as_bytes().to_vec()).collect()
}

/// 以证书链与私钥构造服务端配置，不要求客户端证书。
pub fn server_config(
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    alpn: &[String],
) -> Result<ServerConfig, TlsSetupError> {
    let mut config = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(chain, key)?;
    config.alpn_protocols = alpn_protocols(alpn);
    Ok(config)
}

/// 以信任根构造客户端配置，不携带客户端证书。
pub fn client_config(roots: RootCertStore, alpn: &[String]) -> Result<ClientConfig, TlsSetupError> {
    let mut config = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = alpn_protocols(alpn);
    Ok(config)
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsSetupError> {
    let pem_error = |source| TlsSetupError::Pem {
        path: path.to_path_buf(),
        source,
    };
    let certs = CertificateDer::pem_file_iter(path)
        .map_err(pem_error)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(pem_error)?;
    if certs.is_empty() {
        return Err(TlsSetupError::EmptyChain(path.to_path_buf()));
    }
    Ok(certs)
}

/// 服务端证书文件。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsServerFiles {
    /// PEM 证书链，叶子证书在前。
    pub cert_chain: PathBuf,
    /// PEM 私钥（PKCS#8、PKCS#1 或 SEC1）。
    pub private_key: PathBuf,
    #[serde(default)]
    pub alpn: Vec<String>,
}

impl TlsServerFiles {
    pub fn new(cert_chain: impl Into<PathBuf>, private_key: impl Into<PathBuf>) -> Self {
        Self {
            cert_chain: cert_chain.into(),
            private_key: private_key.into(),
            alpn: Vec::new(),
        }
    }

    pub fn with_alpn(mut self, alpn: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.alpn = alpn.into_iter().map(Into::into).collect();
        self
    }

    /// 读取证书与私钥并构造服务端配置；每次调用都重新读取磁盘。
    pub fn load(&self) -> Result<ServerConfig, TlsSetupError> {
        let chain = load_certs(&self.cert_chain)?;
        let key = PrivateKeyDer::from_pem_file(&self.private_key).map_err(|source| {
            TlsSetupError::Pem {
                path: self.private_key.clone(),
                source,
            }
        })?;
        server_config(chain, key, &self.alpn)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, TlsSetupError> {
        from_toml_str(text)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, TlsSetupError> {
        from_toml_file(path.as_ref())
    }
}

/// 客户端信任根文件。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsClientFiles {
    /// PEM 格式的 CA 证书集合。
    pub roots: PathBuf,
    #[serde(default)]
    pub alpn: Vec<String>,
}

impl TlsClientFiles {
    pub fn new(roots: impl Into<PathBuf>) -> Self {
        Self {
            roots: roots.into(),
            alpn: Vec::new(),
        }
    }

    pub fn with_alpn(mut self, alpn: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.alpn = alpn.into_iter().map(Into::into).collect();
        self
    }

    pub fn load(&self) -> Result<ClientConfig, TlsSetupError> {
        let mut roots = RootCertStore::empty();
        for cert in load_certs(&self.roots)? {
            roots.add(cert)?;
        }
        client_config(roots, &self.alpn)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, TlsSetupError> {
        from_toml_str(text)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, TlsSetupError> {
        from_toml_file(path.as_ref())
    }
}

/// 客户端建连参数：共享的 `ClientConfig` 与用于 SNI 及证书校验的服务器名。
#[derive(Clone, Debug)]
pub struct TlsClientParams {
    pub config: Arc<ClientConfig>,
    pub server_name: ServerName<'static>,
}

impl TlsClientParams {
    /// `server_name` 可以是 DNS 名或 IP 字面量。
    pub fn new(config: Arc<ClientConfig>, server_name: &str) -> Result<Self, TlsSetupError> {
        let server_name = ServerName::try_from(server_name.to_owned())
            .map_err(|_| TlsSetupError::InvalidServerName(server_name.to_owned()))?;
        Ok(Self {
            config,
            server_name,
        })
    }
}

fn from_toml_str<T: DeserializeOwned>(text: &str) -> Result<T, TlsSetupError> {
    Ok(toml::from_str(text)?)
}

fn from_toml_file<T: DeserializeOwned>(path: &Path) -> Result<T, TlsSetupError> {
    let text = fs::read_to_string(path).map_err(|source| TlsSetupError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    from_toml_str(&text)
}
