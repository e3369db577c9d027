use std::{any::Any, collections::BTreeMap, fmt, sync::Arc};

use crate::witness::{Witness, WitnessId};

#[derive(Clone)]
struct Slot {
    name: Arc<str>,
    value: Arc<dyn Any + Send + Sync>,
}

/// 描述“如何抵达某个端点”的不可变异构上下文。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 解析器之间共享同一份参数词汇（主机名、端口、TLS 配置……），每个协议只取自己关心的键；
/// - 传给解析器的上下文不能被对方修改，调用方手中的副本始终保持原样。
///
/// ## 逻辑（How）
/// - 内部是 `Arc<BTreeMap<WitnessId, Slot>>`，克隆只增加引用计数；
/// - [`Context::add`] 走写时复制：仅在共享时克隆映射表，随后替换或插入一个槽位；
/// - 读取通过 [`Witness`] 完成，类型检查封装在见证者内部。
///
/// ## 契约（What）
/// - `add` 返回新上下文，同一见证者的旧值被替换，其余键保持不变；
/// - 以相同顺序执行相同 `add` 序列得到的上下文，对任意见证者的查询结果一致；
/// - 查询不存在的键返回 `None`，这不是错误。
#[derive(Clone, Default)]
pub struct Context {
    slots: Arc<BTreeMap<WitnessId, Slot>>,
}

impl Context {
    /// 空上下文。
    pub fn new() -> Self {
        Self::default()
    }

    /// 返回附加了 `witness = value` 的新上下文，`self` 不受影响。
    pub fn add<V>(&self, witness: &Witness<V>, value: V) -> Self
    where
        V: Send + Sync + 'static,
    {
        self.clone().with(witness, value)
    }

    /// 消费式的 [`Context::add`]，便于链式构造。
    pub fn with<V>(mut self, witness: &Witness<V>, value: V) -> Self
    where
        V: Send + Sync + 'static,
    {
        let slot = Slot {
            name: witness.shared_name(),
            value: witness.inject(value),
        };
        Arc::make_mut(&mut self.slots).insert(witness.id(), slot);
        self
    }

    /// 返回移除了 `witness` 的新上下文。
    pub fn remove<V>(&self, witness: &Witness<V>) -> Self {
        if !self.slots.contains_key(&witness.id()) {
            return self.clone();
        }
        let mut next = self.clone();
        Arc::make_mut(&mut next.slots).remove(&witness.id());
        next
    }

    /// 借用读取。
    pub fn get<V>(&self, witness: &Witness<V>) -> Option<&V>
    where
        V: Send + Sync + 'static,
    {
        self.slots
            .get(&witness.id())
            .and_then(|slot| witness.project(slot.value.as_ref()))
    }

    /// 克隆读取。
    pub fn find<V>(&self, witness: &Witness<V>) -> Option<V>
    where
        V: Clone + Send + Sync + 'static,
    {
        self.get(witness).cloned()
    }

    pub fn contains<V>(&self, witness: &Witness<V>) -> bool {
        self.slots.contains_key(&witness.id())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// 按身份顺序列出已绑定的见证者名称。
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.values().map(|slot| slot.name.as_ref())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}
