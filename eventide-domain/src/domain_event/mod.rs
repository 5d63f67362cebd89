//! 领域事件（Domain Event）与事件信封
//!
//! 定义事件载荷需要实现的最小接口（`DomainEvent`）、随追加写入的
//! 元数据（`Metadata`）以及持久化后的事件信封 `StoredEvent`。

mod domain_event_trait;
mod metadata;
mod stored_event;

pub use domain_event_trait::DomainEvent;
pub use metadata::{Metadata, MetadataExtractor, context_metadata};
pub use stored_event::StoredEvent;
