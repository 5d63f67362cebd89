//! 事件存储协议
//!
//! 流内版本从 1 开始连续递增；流的当前版本即最后一个事件的版本（空流为 0）。
//! 追加以 `expected_version` 做乐观并发检查：同一流上以相同期望版本并发追加，
//! 恰有一个成功，其余得到 `VersionConflict`。
//!
use async_trait::async_trait;
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use std::fmt;
use std::sync::Arc;

use crate::context::CallContext;
use crate::domain_event::{DomainEvent, Metadata, MetadataExtractor, StoredEvent};
use crate::error::DomainResult;
use crate::value_object::Version;

/// `load` 的结果
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedEvents<E> {
    /// 版本严格大于 `from_version` 的事件，按版本升序
    pub events: Vec<StoredEvent<E>>,
    /// 最后一个返回事件的版本；没有事件时等于 `from_version`
    pub last_version: Version,
}

impl<E> LoadedEvents<E> {
    pub(crate) fn new(events: Vec<StoredEvent<E>>, from_version: Version) -> Self {
        let last_version = events.last().map_or(from_version, |e| e.version);
        Self {
            events,
            last_version,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// 丢弃信封，只保留事件载荷
    pub fn into_payloads(self) -> Vec<E> {
        self.events
            .into_iter()
            .map(StoredEvent::into_payload)
            .collect()
    }
}

/// 某个流的最新快照：重放到 `version` 之后的状态
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<S> {
    pub version: Version,
    pub state: S,
    pub taken_at: DateTime<Utc>,
}

/// 存储后端的显式配置
#[derive(Builder, Default, Clone)]
pub struct StoreConfig {
    /// 追加时从调用上下文提取元数据，与显式元数据合并（显式优先）
    metadata_extractor: Option<MetadataExtractor>,
}

impl StoreConfig {
    pub fn metadata_extractor(&self) -> Option<&MetadataExtractor> {
        self.metadata_extractor.as_ref()
    }

    /// 计算一次追加最终写入的元数据
    pub(crate) fn resolve_metadata(&self, ctx: &CallContext, explicit: Metadata) -> Metadata {
        Metadata::resolve(self.metadata_extractor(), ctx, explicit)
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("metadata_extractor", &self.metadata_extractor.is_some())
            .finish()
    }
}

/// 事件存储
///
/// 所有操作都接受 `CallContext`：取消或超时发生时，未提交的工作单元整体回滚。
#[async_trait]
pub trait EventStore: Send + Sync {
    type Event: DomainEvent;

    /// 返回版本严格大于 `from_version` 的事件，按版本升序，无空洞
    async fn load(
        &self,
        ctx: &CallContext,
        stream_id: &str,
        from_version: Version,
    ) -> DomainResult<LoadedEvents<Self::Event>>;

    /// 以 `expected_version + 1 ..= expected_version + n` 原子追加一批事件，返回新版本。
    ///
    /// - `expected_version` 必须等于提交时流的当前版本，否则返回 `VersionConflict`；
    /// - 空批次是一次纯版本检查，成功时原样返回 `expected_version`；
    /// - 同一批次的事件共享同一份元数据。
    async fn append(
        &self,
        ctx: &CallContext,
        stream_id: &str,
        expected_version: Version,
        events: Vec<Self::Event>,
        metadata: Metadata,
    ) -> DomainResult<Version>;

    /// 覆盖写入某个流的最新快照
    async fn save_snapshot<S>(
        &self,
        ctx: &CallContext,
        stream_id: &str,
        version: Version,
        state: &S,
    ) -> DomainResult<()>
    where
        S: Serialize + Sync;

    /// 读取最新快照；不存在时返回 `None`
    async fn load_snapshot<S>(
        &self,
        ctx: &CallContext,
        stream_id: &str,
    ) -> DomainResult<Option<Snapshot<S>>>
    where
        S: DeserializeOwned + Send;
}

#[async_trait]
impl<T> EventStore for Arc<T>
where
    T: EventStore + ?Sized,
{
    type Event = T::Event;

    async fn load(
        &self,
        ctx: &CallContext,
        stream_id: &str,
        from_version: Version,
    ) -> DomainResult<LoadedEvents<Self::Event>> {
        (**self).load(ctx, stream_id, from_version).await
    }

    async fn append(
        &self,
        ctx: &CallContext,
        stream_id: &str,
        expected_version: Version,
        events: Vec<Self::Event>,
        metadata: Metadata,
    ) -> DomainResult<Version> {
        (**self)
            .append(ctx, stream_id, expected_version, events, metadata)
            .await
    }

    async fn save_snapshot<S>(
        &self,
        ctx: &CallContext,
        stream_id: &str,
        version: Version,
        state: &S,
    ) -> DomainResult<()>
    where
        S: Serialize + Sync,
    {
        (**self).save_snapshot(ctx, stream_id, version, state).await
    }

    async fn load_snapshot<S>(
        &self,
        ctx: &CallContext,
        stream_id: &str,
    ) -> DomainResult<Option<Snapshot<S>>>
    where
        S: DeserializeOwned + Send,
    {
        (**self).load_snapshot(ctx, stream_id).await
    }
}
