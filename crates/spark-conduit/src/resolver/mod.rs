//! # resolver 模块说明
//!
//! ## 角色定位（Why）
//! - 把“描述目的地的上下文”转换为“一条活跃的连接”：解析表中每个条目绑定一个协议与一个解析函数，
//!   按优先级依次尝试，直到某个协议建连成功；
//! - 典型用法是 TLS 条目优先级高于明文 TCP 条目，TLS 建连失败时自动回退到 TCP。
//!
//! ## 顺序与并发（What）
//! - 条目在表构造时按“优先级降序、插入顺序升序”排序一次，之后不再重排；
//! - 同一次解析内的尝试严格串行，不会并发地向多个端点建连，避免遗留多个半开连接。

mod extract;

use std::{fmt, sync::Arc};

use tracing::{debug, warn};

pub use extract::{
    Extract, Optional, Required, Resolve, WithDefault, optional, required, with_default,
};

use crate::{
    BoxFuture,
    context::Context,
    error::{ConduitError, ResolveAttempt, Result},
    flow::Flow,
    protocol::Protocol,
    registry::{ProtocolId, ProtocolWitness},
};

enum Attempt {
    NotApplicable,
    Connected(Flow),
    Failed(ConduitError),
}

trait Candidate: Send + Sync {
    fn protocol_id(&self) -> ProtocolId;
    fn protocol_name(&self) -> &Arc<str>;
    fn attempt<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, Attempt>;
}

struct TypedCandidate<P: Protocol> {
    witness: ProtocolWitness<P>,
    resolve: Resolve<P::Endpoint>,
}

impl<P: Protocol> Candidate for TypedCandidate<P> {
    fn protocol_id(&self) -> ProtocolId {
        self.witness.id()
    }

    fn protocol_name(&self) -> &Arc<str> {
        self.witness.shared_name()
    }

    fn attempt<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, Attempt> {
        Box::pin(async move {
            let Some(endpoint) = self.resolve.call(ctx).await else {
                return Attempt::NotApplicable;
            };
            match self.witness.connect(endpoint).await {
                Ok(flow) => Attempt::Connected(flow),
                Err(err) => Attempt::Failed(err),
            }
        })
    }
}

/// 解析表中的一个条目。
#[derive(Clone)]
pub struct ResolverEntry {
    candidate: Arc<dyn Candidate>,
    priority: i32,
}

impl ResolverEntry {
    pub fn protocol_id(&self) -> ProtocolId {
        self.candidate.protocol_id()
    }

    pub fn protocol_name(&self) -> &str {
        self.candidate.protocol_name()
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }
}

impl fmt::Debug for ResolverEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverEntry")
            .field("protocol", &self.protocol_name())
            .field("priority", &self.priority)
            .finish()
    }
}

/// 解析表的构建器。
#[derive(Default)]
pub struct ResolverTableBuilder {
    entries: Vec<ResolverEntry>,
}

impl ResolverTableBuilder {
    /// 追加一个条目；同优先级时先追加者先尝试。
    pub fn add<P: Protocol>(
        mut self,
        witness: &ProtocolWitness<P>,
        priority: i32,
        resolve: Resolve<P::Endpoint>,
    ) -> Self {
        self.entries.push(ResolverEntry {
            candidate: Arc::new(TypedCandidate {
                witness: witness.clone(),
                resolve,
            }),
            priority,
        });
        self
    }

    /// 固化排序并生成解析表。
    pub fn build(mut self) -> ResolverTable {
        // `sort_by_key` 是稳定排序，同优先级保持插入顺序。
        self.entries.sort_by_key(|entry| std::cmp::Reverse(entry.priority));
        ResolverTable {
            entries: self.entries.into(),
        }
    }
}

/// 按优先级排好序、构造后只读的解析表。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 以“解析函数 + 协议”对描述所有可选传输，调用方只需提供上下文；
/// - 失败的建连不会被吞掉：它们按尝试顺序汇总进 [`ConduitError::ResolutionFailed`]。
///
/// ## 逻辑（How）
/// 1. 按固化顺序逐个求值解析函数，`None` 表示不适用，计入 `skipped`；
/// 2. 得到端点后调用协议 `connect`，成功即包装为 [`Flow`] 返回，剩余条目不再尝试；
/// 3. 失败则记录并继续下一个条目；
/// 4. 全部耗尽后返回 `ResolutionFailed`。
///
/// ## 契约（What）
/// - 空表立即失败，不会挂起；
/// - 若所有解析函数都不挂起且都不适用，调用必然在有限步内返回；
/// - 成功返回的 Flow 一定由表中某个条目的协议产生。
#[derive(Clone, Default)]
pub struct ResolverTable {
    entries: Arc<[ResolverEntry]>,
}

impl ResolverTable {
    pub fn builder() -> ResolverTableBuilder {
        ResolverTableBuilder::default()
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 以尝试顺序遍历条目。
    pub fn entries(&self) -> impl Iterator<Item = &ResolverEntry> {
        self.entries.iter()
    }

    /// 依优先级解析并建连。
    pub async fn resolve(&self, ctx: &Context) -> Result<Flow> {
        let mut attempts = Vec::new();
        let mut skipped = 0usize;

        for entry in self.entries.iter() {
            let protocol = entry.candidate.protocol_name();
            match entry.candidate.attempt(ctx).await {
                Attempt::NotApplicable => {
                    debug!(protocol = %protocol, priority = entry.priority, "resolver not applicable");
                    skipped += 1;
                }
                Attempt::Connected(flow) => {
                    debug!(protocol = %protocol, priority = entry.priority, "flow established");
                    return Ok(flow);
                }
                Attempt::Failed(error) => {
                    warn!(
                        protocol = %protocol,
                        priority = entry.priority,
                        error = %error,
                        "connect failed, trying next resolver"
                    );
                    attempts.push(ResolveAttempt {
                        protocol: Arc::clone(protocol),
                        priority: entry.priority,
                        error,
                    });
                }
            }
        }

        Err(ConduitError::ResolutionFailed { attempts, skipped })
    }
}

impl fmt::Debug for ResolverTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.iter()).finish()
    }
}

/// 函数式入口，等价于 [`ResolverTable::resolve`]。
pub async fn resolve(ctx: &Context, table: &ResolverTable) -> Result<Flow> {
    table.resolve(ctx).await
}
