use std::{future::Future, sync::Arc};

use futures::{FutureExt, future};

use crate::{BoxFuture, context::Context, witness::Witness};

/// 从上下文中抽取解析函数所需的参数。
///
/// # 契约说明（What）
/// - 返回 `None` 表示“本解析器不适用于该上下文”，解析函数不会被调用；
/// - 元组实现按成员顺序抽取，任一成员返回 `None` 即整体短路。
pub trait Extract: Send + Sync + 'static {
    type Output: Send + 'static;

    fn extract(&self, ctx: &Context) -> Option<Self::Output>;
}

/// 必需参数：缺失时解析器短路。
#[derive(Clone, Debug)]
pub struct Required<V> {
    witness: Witness<V>,
}

/// 带默认值的参数：缺失时使用默认值。
#[derive(Clone, Debug)]
pub struct WithDefault<V> {
    witness: Witness<V>,
    default: V,
}

/// 可选参数：缺失时得到 `None`。
#[derive(Clone, Debug)]
pub struct Optional<V> {
    witness: Witness<V>,
}

pub fn required<V>(witness: &Witness<V>) -> Required<V> {
    Required {
        witness: witness.clone(),
    }
}

pub fn with_default<V>(witness: &Witness<V>, default: V) -> WithDefault<V> {
    WithDefault {
        witness: witness.clone(),
        default,
    }
}

pub fn optional<V>(witness: &Witness<V>) -> Optional<V> {
    Optional {
        witness: witness.clone(),
    }
}

impl<V> Extract for Required<V>
where
    V: Clone + Send + Sync + 'static,
{
    type Output = V;

    fn extract(&self, ctx: &Context) -> Option<V> {
        ctx.find(&self.witness)
    }
}

impl<V> Extract for WithDefault<V>
where
    V: Clone + Send + Sync + 'static,
{
    type Output = V;

    fn extract(&self, ctx: &Context) -> Option<V> {
        Some(ctx.find(&self.witness).unwrap_or_else(|| self.default.clone()))
    }
}

impl<V> Extract for Optional<V>
where
    V: Clone + Send + Sync + 'static,
{
    type Output = Option<V>;

    fn extract(&self, ctx: &Context) -> Option<Option<V>> {
        Some(ctx.find(&self.witness))
    }
}

impl Extract for () {
    type Output = ();

    fn extract(&self, _ctx: &Context) -> Option<()> {
        Some(())
    }
}

macro_rules! impl_extract_tuple {
    ($($name:ident),+) => {
        impl<$($name: Extract),+> Extract for ($($name,)+) {
            type Output = ($($name::Output,)+);

            #[allow(non_snake_case)]
            fn extract(&self, ctx: &Context) -> Option<Self::Output> {
                let ($($name,)+) = self;
                Some(($($name.extract(ctx)?,)+))
            }
        }
    };
}

impl_extract_tuple!(A);
impl_extract_tuple!(A, B);
impl_extract_tuple!(A, B, C);
impl_extract_tuple!(A, B, C, D);
impl_extract_tuple!(A, B, C, D, E);
impl_extract_tuple!(A, B, C, D, E, F);

type ResolveFn<E> = dyn Fn(&Context) -> BoxFuture<'static, Option<E>> + Send + Sync;

/// 解析函数：`Context → 可能挂起的 Option<端点>`。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 解析器先声明依赖哪些见证者，再提供从参数到端点的函数；声明与计算分离，
///   使“参数缺失”在进入用户函数前就被识别为“不适用”，而不是错误；
/// - 端点计算可能需要 DNS 查询等挂起操作，也可能是纯计算，两者统一为 `BoxFuture`。
///
/// ## 契约（What）
/// - [`Resolve::new`]：用户函数返回 Future，可挂起；
/// - [`Resolve::ready`]：用户函数同步返回，结果包装为已就绪的 Future；
/// - 任一 `required` 参数缺失时直接得到 `None`，用户函数不会被调用。
pub struct Resolve<E> {
    inner: Arc<ResolveFn<E>>,
}

impl<E> Clone for Resolve<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> Resolve<E>
where
    E: Send + 'static,
{
    /// 以可挂起的函数构造解析器。
    pub fn new<X, F, Fut>(extract: X, resolve: F) -> Self
    where
        X: Extract,
        F: Fn(X::Output) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<E>> + Send + 'static,
    {
        Self {
            inner: Arc::new(move |ctx: &Context| match extract.extract(ctx) {
                Some(values) => resolve(values).boxed(),
                None => future::ready(None).boxed(),
            }),
        }
    }

    /// 以同步函数构造解析器。
    pub fn ready<X, F>(extract: X, resolve: F) -> Self
    where
        X: Extract,
        F: Fn(X::Output) -> Option<E> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(move |ctx: &Context| {
                future::ready(extract.extract(ctx).and_then(&resolve)).boxed()
            }),
        }
    }

    /// 针对上下文求值。
    pub fn call(&self, ctx: &Context) -> BoxFuture<'static, Option<E>> {
        (self.inner)(ctx)
    }
}

impl<E> std::fmt::Debug for Resolve<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolve").finish_non_exhaustive()
    }
}
