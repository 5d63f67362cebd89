//! 聚合仓储组合实现
//!
//! 加载：读取快照（若有）→ 以快照版本与状态初始化聚合 → 加载快照版本之后的事件并重放 →
//! 校验聚合版本等于存储报告的最后版本（不一致说明重放被跳过或数据损坏，直接报错）。
//!
//! 保存：取出待持久化事件 → 以 `expected_version` 追加。追加失败（例如版本冲突）后
//! 聚合实例已不可再用，调用方应重新加载后重试命令。
//!
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

use crate::aggregate::{Aggregate, SnapshotAggregate};
use crate::context::CallContext;
use crate::domain_event::Metadata;
use crate::error::{DomainError, DomainResult};
use crate::persist::{EventStore, LoadedEvents, Snapshot, SnapshotPolicy};
use crate::value_object::Version;

#[async_trait]
pub trait AggregateRepository<A>: Send + Sync
where
    A: Aggregate,
{
    /// 按业务 ID 加载聚合；既无快照也无事件时返回 `None`
    async fn load(&self, ctx: &CallContext, id: &str) -> Result<Option<A>, A::Error>;

    /// 持久化聚合的待持久化事件，返回保存后的版本；没有新事件时不访问存储
    async fn save(
        &self,
        ctx: &CallContext,
        aggregate: &mut A,
        metadata: Metadata,
    ) -> Result<Version, A::Error>;
}

#[async_trait]
impl<A, T> AggregateRepository<A> for Arc<T>
where
    A: Aggregate,
    T: AggregateRepository<A> + ?Sized,
{
    async fn load(&self, ctx: &CallContext, id: &str) -> Result<Option<A>, A::Error> {
        (**self).load(ctx, id).await
    }

    async fn save(
        &self,
        ctx: &CallContext,
        aggregate: &mut A,
        metadata: Metadata,
    ) -> Result<Version, A::Error> {
        (**self).save(ctx, aggregate, metadata).await
    }
}

/// 重放并校验版本
fn replay_onto<A>(aggregate: &mut A, loaded: LoadedEvents<A::Event>) -> DomainResult<()>
where
    A: Aggregate,
{
    let last_version = loaded.last_version;
    aggregate.replay(loaded.into_payloads());

    if aggregate.version() != last_version {
        error!(
            stream_id = aggregate.stream_id(),
            aggregate = %aggregate.version(),
            store = %last_version,
            "replay mismatch"
        );
        return Err(DomainError::ReplayMismatch {
            stream_id: aggregate.stream_id().to_string(),
            aggregate: aggregate.version(),
            store: last_version,
        });
    }

    Ok(())
}

/// 追加待持久化事件，返回 `(expected_version, new_version)`；没有事件时返回 `None`
async fn append_pending<A, S>(
    store: &S,
    ctx: &CallContext,
    aggregate: &mut A,
    metadata: Metadata,
) -> DomainResult<Option<(Version, Version)>>
where
    A: Aggregate,
    S: EventStore<Event = A::Event>,
{
    let flushed = aggregate.flush();
    if flushed.is_empty() {
        return Ok(None);
    }

    let expected = flushed.expected_version;
    let new_version = store
        .append(ctx, aggregate.stream_id(), expected, flushed.events, metadata)
        .await?;

    debug!(%expected, %new_version, "saved aggregate");
    Ok(Some((expected, new_version)))
}

/// 纯事件重放的聚合仓储
pub struct EventStoreAggregateRepository<S> {
    store: S,
}

impl<S> EventStoreAggregateRepository<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

#[async_trait]
impl<A, S> AggregateRepository<A> for EventStoreAggregateRepository<S>
where
    A: Aggregate,
    S: EventStore<Event = A::Event>,
{
    #[instrument(skip_all, fields(aggregate = A::TYPE, id = %id))]
    async fn load(&self, ctx: &CallContext, id: &str) -> Result<Option<A>, A::Error> {
        let stream_id = A::stream_id_for(id);
        let loaded = self.store.load(ctx, &stream_id, Version::new()).await?;
        if loaded.is_empty() {
            return Ok(None);
        }

        let mut aggregate = A::new(stream_id);
        replay_onto(&mut aggregate, loaded)?;
        Ok(Some(aggregate))
    }

    #[instrument(skip_all, fields(aggregate = A::TYPE, stream_id = aggregate.stream_id()))]
    async fn save(
        &self,
        ctx: &CallContext,
        aggregate: &mut A,
        metadata: Metadata,
    ) -> Result<Version, A::Error> {
        append_pending(&self.store, ctx, aggregate, metadata).await?;
        Ok(aggregate.version())
    }
}

/// 快照 + 增量事件重放的聚合仓储
///
/// 快照只是缓存：读取失败按未命中处理，写入失败只记录告警，
/// 两者都不会影响事件本身的持久化结果。
pub struct SnapshottingAggregateRepository<S> {
    store: S,
    policy: SnapshotPolicy,
}

impl<S> SnapshottingAggregateRepository<S> {
    pub fn new(store: S, policy: SnapshotPolicy) -> Self {
        Self { store, policy }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> SnapshotPolicy {
        self.policy
    }
}

#[async_trait]
impl<A, S> AggregateRepository<A> for SnapshottingAggregateRepository<S>
where
    A: SnapshotAggregate,
    S: EventStore<Event = A::Event>,
{
    #[instrument(skip_all, fields(aggregate = A::TYPE, id = %id))]
    async fn load(&self, ctx: &CallContext, id: &str) -> Result<Option<A>, A::Error> {
        let stream_id = A::stream_id_for(id);

        let snapshot: Option<Snapshot<A::Snapshot>> =
            match self.store.load_snapshot(ctx, &stream_id).await {
                Ok(snapshot) => snapshot,
                // 调用方的取消/超时不是快照故障
                Err(err @ (DomainError::Cancelled | DomainError::DeadlineExceeded)) => {
                    return Err(err.into());
                }
                Err(err) => {
                    warn!(error = %err, "snapshot unavailable, replaying from the start");
                    None
                }
            };

        let (mut aggregate, from_version) = match snapshot {
            Some(snapshot) => {
                debug!(version = %snapshot.version, "restoring from snapshot");
                (
                    A::restore(stream_id.clone(), snapshot.version, snapshot.state),
                    snapshot.version,
                )
            }
            None => (A::new(stream_id.clone()), Version::new()),
        };

        let loaded = self.store.load(ctx, &stream_id, from_version).await?;
        if from_version.is_new() && loaded.is_empty() {
            return Ok(None);
        }

        replay_onto(&mut aggregate, loaded)?;
        Ok(Some(aggregate))
    }

    #[instrument(skip_all, fields(aggregate = A::TYPE, stream_id = aggregate.stream_id()))]
    async fn save(
        &self,
        ctx: &CallContext,
        aggregate: &mut A,
        metadata: Metadata,
    ) -> Result<Version, A::Error> {
        let Some((expected, new_version)) =
            append_pending(&self.store, ctx, aggregate, metadata).await?
        else {
            return Ok(aggregate.version());
        };

        if self
            .policy
            .should_snapshot(expected.value(), new_version.value())
        {
            let state = aggregate.snapshot();
            if let Err(err) = self
                .store
                .save_snapshot(ctx, aggregate.stream_id(), new_version, &state)
                .await
            {
                warn!(error = %err, version = %new_version, "snapshot save failed");
            }
        }

        Ok(new_version)
    }
}
