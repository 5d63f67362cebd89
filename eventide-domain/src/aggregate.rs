//! 聚合（Aggregate）与重放引擎
//!
//! `AggregateBase` 负责流标识、版本与待持久化事件的簿记；具体聚合以组合方式持有它，
//! 并通过 `Aggregate` 的默认方法委托：
//! - `apply` 调用领域状态变更函数 `when`，然后版本加一（用于重放已提交事件）；
//! - `raise` 等价于 `apply` 后把事件放入待持久化缓冲；
//! - `flush` 取出并清空缓冲，同时给出下一次追加的 `expected_version`。
//!
//! 聚合实例不是并发安全的：一个实例只由一个写者使用，同一流上不同实例之间的竞争
//! 交由存储在追加时的乐观并发检查裁决。
//!
use serde::{Serialize, de::DeserializeOwned};
use std::error::Error;

use crate::domain_event::DomainEvent;
use crate::error::DomainError;
use crate::value_object::Version;

/// 重放引擎：流标识 + 当前版本（含未持久化事件）+ 待持久化事件
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateBase<E> {
    stream_id: String,
    version: Version,
    pending: Vec<E>,
}

/// `flush` 的结果
#[derive(Debug, Clone, PartialEq)]
pub struct Flushed<E> {
    /// 自上次 flush 以来产生的事件，按产生顺序
    pub events: Vec<E>,
    /// 追加这些事件时应传入的版本：`version - events.len()`
    pub expected_version: Version,
}

impl<E> Flushed<E> {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl<E> AggregateBase<E> {
    /// 空聚合：版本 0，无待持久化事件
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            version: Version::new(),
            pending: Vec::new(),
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// 当前版本，包含尚未持久化的事件
    pub fn version(&self) -> Version {
        self.version
    }

    /// 强制设置版本（从快照恢复时使用），不影响待持久化事件
    pub fn seed(&mut self, version: Version) {
        self.version = version;
    }

    pub fn pending(&self) -> &[E] {
        &self.pending
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// 版本前进一步（`apply` 在状态变更之后调用）
    pub fn advance(&mut self) {
        self.version = self.version.next();
    }

    /// 记录一个新产生的事件
    pub fn enqueue(&mut self, event: E) {
        self.pending.push(event);
    }

    /// 取出并清空待持久化事件
    pub fn flush(&mut self) -> Flushed<E> {
        let events = std::mem::take(&mut self.pending);
        let expected_version = self.version.rewind(events.len());
        Flushed {
            events,
            expected_version,
        }
    }
}

/// 聚合根接口
pub trait Aggregate: Send + Sync + Sized {
    const TYPE: &'static str;

    /// 该聚合支持的命令类型
    type Command: Send;
    /// 该聚合产生的领域事件类型
    type Event: DomainEvent;
    /// 命令执行或持久化环节的错误类型
    type Error: Error + From<DomainError> + Send + Sync + 'static;

    /// 以流标识创建空聚合
    fn new(stream_id: String) -> Self;

    fn base(&self) -> &AggregateBase<Self::Event>;

    fn base_mut(&mut self) -> &mut AggregateBase<Self::Event>;

    /// 领域状态变更函数：只修改状态，不触碰版本与缓冲
    fn when(&mut self, event: &Self::Event);

    /// 校验领域规则并通过 `raise` 产生事件
    fn handle(&mut self, command: Self::Command) -> Result<(), Self::Error>;

    /// 由业务 ID 得到流标识，形如 `account:42`
    fn stream_id_for(id: &str) -> String {
        format!("{}:{}", Self::TYPE, id)
    }

    fn stream_id(&self) -> &str {
        self.base().stream_id()
    }

    fn version(&self) -> Version {
        self.base().version()
    }

    /// 应用一个事件：先变更状态，再版本加一
    fn apply(&mut self, event: &Self::Event) {
        self.when(event);
        self.base_mut().advance();
    }

    /// 产生一个新事件：`apply` 并放入待持久化缓冲
    fn raise(&mut self, event: Self::Event) {
        self.apply(&event);
        self.base_mut().enqueue(event);
    }

    /// 按顺序重放一组已提交事件
    fn replay<I>(&mut self, events: I)
    where
        I: IntoIterator<Item = Self::Event>,
    {
        for event in events {
            self.apply(&event);
        }
    }

    fn flush(&mut self) -> Flushed<Self::Event> {
        self.base_mut().flush()
    }
}

/// 支持快照的聚合
///
/// 快照只是缓存：可能落后于事件日志，后续事件的重放总会修正它。
pub trait SnapshotAggregate: Aggregate {
    /// 快照的持久化形态
    type Snapshot: Serialize + DeserializeOwned + Send + Sync;

    /// 导出当前状态
    fn snapshot(&self) -> Self::Snapshot;

    /// 把快照状态写回一个空聚合
    fn apply_snapshot(&mut self, snapshot: Self::Snapshot);

    /// 以快照为基础构造聚合，版本置为快照版本
    fn restore(stream_id: String, version: Version, snapshot: Self::Snapshot) -> Self {
        let mut aggregate = Self::new(stream_id);
        aggregate.apply_snapshot(snapshot);
        aggregate.base_mut().seed(version);
        aggregate
    }
}
