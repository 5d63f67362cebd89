//! 事件溯源持久化核心（eventide-domain）
//!
//! 让聚合以不可变事件序列记录意图，在乐观并发控制下持久化这些事件，
//! 并通过重放（可选地借助快照加速）重建聚合状态：
//! - 事件存储协议与参考后端（`persist`）：内存实现与 SQLite 事务实现；
//! - 聚合重放引擎（`aggregate`）：apply / raise / flush / version；
//! - 元数据与调用上下文（`domain_event::Metadata`、`context::CallContext`）；
//! - 事件编解码注册表（`codec`）；
//! - 聚合仓储与命令编排（`persist::AggregateRepository`、`aggregate_root`）。
//!
//! 典型用法：
//! 1. 用 `#[eventide_macros::event]` 定义事件枚举，实现 `Aggregate` 的 `when/handle`；
//! 2. 选择 `InMemoryEventStore` 或 `SqliteEventStore` 作为存储；
//! 3. 用 `EventStoreAggregateRepository`/`SnapshottingAggregateRepository` 组装仓储；
//! 4. 通过 `AggregateRoot` 编排一条完整的命令到事件持久化的流程。
//!
pub mod aggregate;
pub mod aggregate_root;
pub mod codec;
pub mod context;
pub mod domain_event;
pub mod error;
pub mod persist;
pub mod value_object;

// 允许在本 crate 内部通过 ::eventide_domain 进行自引用，
// 以便过程宏在本 crate 的单元测试中也能解析到 ::eventide_domain 路径。
extern crate self as eventide_domain;
