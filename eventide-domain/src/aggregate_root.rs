//! 聚合根编排器（AggregateRoot）
//!
//! 封装“加载聚合 → 执行命令 → 持久化新事件”的标准流程，
//! 以仓储实现（`AggregateRepository`）为依赖，便于在应用层直接调用。
//!
use crate::{
    aggregate::Aggregate, context::CallContext, domain_event::Metadata,
    persist::AggregateRepository, value_object::Version,
};
use std::marker::PhantomData;
use tracing::instrument;

/// 面向应用层的聚合根编排器。
///
/// - `A`：聚合类型（实现 `Aggregate`）
/// - `R`：聚合仓储（实现 `AggregateRepository<A>`）
pub struct AggregateRoot<A, R>
where
    A: Aggregate,
    R: AggregateRepository<A>,
{
    repo: R,
    _marker: PhantomData<fn() -> A>,
}

impl<A, R> AggregateRoot<A, R>
where
    A: Aggregate,
    R: AggregateRepository<A>,
{
    /// 创建编排器实例
    pub fn new(repo: R) -> Self {
        Self {
            repo,
            _marker: PhantomData,
        }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    /// 执行聚合命令：
    /// 1. 加载聚合，不存在则以流标识新建；
    /// 2. 执行命令（领域校验失败时不访问存储）；
    /// 3. 持久化新事件并返回保存后的版本。
    ///
    /// 版本冲突以 `A::Error`（由 `DomainError::VersionConflict` 转换）返回，
    /// 调用方可重新执行整个流程。
    #[instrument(skip_all, fields(aggregate = A::TYPE, id = %id))]
    pub async fn execute(
        &self,
        ctx: &CallContext,
        id: &str,
        command: A::Command,
        metadata: Metadata,
    ) -> Result<Version, A::Error> {
        let mut aggregate = match self.repo.load(ctx, id).await? {
            Some(aggregate) => aggregate,
            None => A::new(A::stream_id_for(id)),
        };

        aggregate.handle(command)?;

        self.repo.save(ctx, &mut aggregate, metadata).await
    }

    /// 加载聚合当前状态（只读）
    pub async fn load(&self, ctx: &CallContext, id: &str) -> Result<Option<A>, A::Error> {
        self.repo.load(ctx, id).await
    }
}
