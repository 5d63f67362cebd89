//! 持久化与事件溯源（persist）
//!
//! - 事件存储协议（`EventStore`）：按流加载、带乐观并发检查的原子追加、快照读写；
//! - 参考后端：内存实现（`InMemoryEventStore`）与 SQLite 事务实现（`SqliteEventStore`，特性 `sqlite`）；
//! - 快照策略（`SnapshotPolicy`）；
//! - 聚合仓储：纯事件重放或“快照 + 增量事件”重放（`EventStoreAggregateRepository`、`SnapshottingAggregateRepository`）。
//!
mod aggregate_repository;
mod event_store;
mod memory;
mod snapshot_policy;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use aggregate_repository::{
    AggregateRepository, EventStoreAggregateRepository, SnapshottingAggregateRepository,
};
pub use event_store::{EventStore, LoadedEvents, Snapshot, StoreConfig};
pub use memory::InMemoryEventStore;
pub use snapshot_policy::SnapshotPolicy;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteEventStore;
