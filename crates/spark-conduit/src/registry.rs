//! # registry 模块说明
//!
//! ## 角色定位（Why）
//! - 协议实现在进程启动阶段注册自己，换取一对见证者：端点见证者用于在上下文中携带已解析的端点，
//!   协议见证者是建连、包装与解包 Flow 的唯一凭证；
//! - 注册表只追加、不删除，生命周期与进程一致。
//!
//! ## 并发约束（What）
//! - 注册必须在解析/服务阶段开始前完成；表由单把读写锁保护，
//!   并发注册不会破坏内存安全，但不是受支持的使用方式；
//! - 同一实现注册两次得到两个互不相等的见证者，二者不可互换，
//!   这允许同一传输的两个不同配置实例共存。

use std::{
    fmt,
    sync::{Arc, OnceLock},
};

use parking_lot::RwLock;
use tracing::debug;

use crate::{
    error::{ConduitError, FlowStage, Result},
    flow::Flow,
    protocol::Protocol,
    witness::{Witness, WitnessId},
};

/// 协议身份。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolId(WitnessId);

impl ProtocolId {
    fn fresh() -> Self {
        ProtocolId(WitnessId::fresh())
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// 注册返回的协议见证者。
///
/// # 教案式说明
/// - **意图 (Why)**：持有协议实现本身与其身份，解析表、服务描述符与 Flow 解包都以它为凭证；
/// - **契约 (What)**：相等性只比较身份；名称仅用于诊断，允许重复；
/// - **风险 (Trade-offs)**：见证者内含 `Arc<P>`，克隆廉价，但会让协议实现的生命周期覆盖所有持有者。
pub struct ProtocolWitness<P: Protocol> {
    id: ProtocolId,
    name: Arc<str>,
    protocol: Arc<P>,
    endpoint: Witness<P::Endpoint>,
}

impl<P: Protocol> ProtocolWitness<P> {
    pub fn id(&self) -> ProtocolId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn shared_name(&self) -> &Arc<str> {
        &self.name
    }

    /// 协议实现本身。
    pub fn protocol(&self) -> &Arc<P> {
        &self.protocol
    }

    /// 注册时一并分配的端点见证者。
    pub fn endpoint(&self) -> &Witness<P::Endpoint> {
        &self.endpoint
    }

    /// 直接连接到已知端点，并把结果包装为擦除类型的 [`Flow`]。
    ///
    /// 握手类失败会映射为 [`ConduitError::HandshakeFailed`]。
    pub async fn connect(&self, endpoint: P::Endpoint) -> Result<Flow> {
        let flow = self
            .protocol
            .connect(endpoint)
            .await
            .map_err(|err| ConduitError::from_transport(&self.name, FlowStage::Connect, err))?;
        Ok(Flow::new(self, flow))
    }

    /// 将本协议产生的具体连接包装为 [`Flow`]。
    pub fn wrap(&self, flow: P::Flow) -> Flow {
        Flow::new(self, flow)
    }
}

impl<P: Protocol> Clone for ProtocolWitness<P> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: Arc::clone(&self.name),
            protocol: Arc::clone(&self.protocol),
            endpoint: self.endpoint.clone(),
        }
    }
}

impl<P: Protocol> PartialEq for ProtocolWitness<P> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<P: Protocol> Eq for ProtocolWitness<P> {}

impl<P: Protocol> fmt::Debug for ProtocolWitness<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolWitness")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// 注册表中一条协议记录的诊断视图。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProtocolInfo {
    pub id: ProtocolId,
    pub name: Arc<str>,
    pub implementation: &'static str,
    pub endpoint: WitnessId,
}

/// 只追加的协议注册表；协议实现由见证者持有，表中只保留诊断信息。
#[derive(Default)]
pub struct ProtocolRegistry {
    entries: RwLock<Vec<ProtocolInfo>>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 进程级注册表。
    pub fn global() -> &'static ProtocolRegistry {
        static GLOBAL: OnceLock<ProtocolRegistry> = OnceLock::new();
        GLOBAL.get_or_init(ProtocolRegistry::new)
    }

    /// 注册协议实现，返回 `(端点见证者, 协议见证者)`。
    pub fn register<P: Protocol>(
        &self,
        name: impl Into<Arc<str>>,
        protocol: P,
    ) -> (Witness<P::Endpoint>, ProtocolWitness<P>) {
        let name: Arc<str> = name.into();
        let id = ProtocolId::fresh();
        let endpoint = Witness::new(format!("{name}.endpoint"));
        let witness = ProtocolWitness {
            id,
            name: Arc::clone(&name),
            protocol: Arc::new(protocol),
            endpoint: endpoint.clone(),
        };

        let info = ProtocolInfo {
            id,
            name,
            implementation: std::any::type_name::<P>(),
            endpoint: endpoint.id(),
        };
        debug!(protocol = %info.name, id = %id, implementation = info.implementation, "protocol registered");
        self.entries.write().push(info);
        (endpoint, witness)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn contains(&self, id: ProtocolId) -> bool {
        self.entries.read().iter().any(|info| info.id == id)
    }

    /// 按注册顺序列出所有协议。
    pub fn describe(&self) -> Vec<ProtocolInfo> {
        self.entries.read().clone()
    }

    pub fn name_of(&self, id: ProtocolId) -> Option<Arc<str>> {
        self.entries
            .read()
            .iter()
            .find(|info| info.id == id)
            .map(|info| Arc::clone(&info.name))
    }
}

impl fmt::Debug for ProtocolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.describe()).finish()
    }
}

/// 在进程级注册表中注册协议。
pub fn register<P: Protocol>(
    name: impl Into<Arc<str>>,
    protocol: P,
) -> (Witness<P::Endpoint>, ProtocolWitness<P>) {
    ProtocolRegistry::global().register(name, protocol)
}
