use std::{
    any::Any,
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

static NEXT_WITNESS_ID: AtomicU64 = AtomicU64::new(1);

/// 见证者的不透明身份。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WitnessId(u64);

impl WitnessId {
    pub(crate) fn fresh() -> Self {
        WitnessId(NEXT_WITNESS_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// 返回内部计数值，仅用于诊断输出。
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WitnessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 带类型的身份令牌，是向 [`Context`](crate::Context) 存取值的唯一途径。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 异构上下文需要“按键取值且类型安全”：键本身携带值类型 `V`，调用方永远不需要手写类型转换；
/// - 身份在创建时一次性分配，重复创建同名见证者会得到互不相等的新身份，代表另一个参数槽位。
///
/// ## 逻辑（How）
/// - `id` 来自进程级单调计数器；`name` 仅用于诊断；
/// - `PhantomData<fn() -> V>` 让见证者无论 `V` 为何都满足 `Send + Sync`，可放入 `static`；
/// - 存取都经由 [`Witness::inject`]/[`Witness::project`]，类型检查封装在见证者内部。
///
/// ## 契约（What）
/// - 相等性只比较 `id`，与名称无关；
/// - 通过同一见证者写入的值，读取时必然是 `V` 类型。
pub struct Witness<V> {
    id: WitnessId,
    name: Arc<str>,
    _marker: PhantomData<fn() -> V>,
}

impl<V> Witness<V>
where
    V: Send + Sync + 'static,
{
    /// 分配新的见证者身份。
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            id: WitnessId::fresh(),
            name: name.into(),
            _marker: PhantomData,
        }
    }

    pub(crate) fn inject(&self, value: V) -> Arc<dyn Any + Send + Sync> {
        Arc::new(value)
    }

    pub(crate) fn project<'a>(&self, slot: &'a (dyn Any + Send + Sync)) -> Option<&'a V> {
        slot.downcast_ref::<V>()
    }
}

impl<V> Witness<V> {
    pub fn id(&self) -> WitnessId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn shared_name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }
}

impl<V> Clone for Witness<V> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: Arc::clone(&self.name),
            _marker: PhantomData,
        }
    }
}

impl<V> PartialEq for Witness<V> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<V> Eq for Witness<V> {}

impl<V> Hash for Witness<V> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<V> fmt::Debug for Witness<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Witness")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}
