use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::value_object::Version;

use super::metadata::Metadata;

/// 事件信封：事件载荷加上追加成功时由存储分配的持久化信息
///
/// 只由成功的追加创建，创建后不再修改。
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent<E> {
    /// 事件唯一标识（UUID v7）
    pub event_id: Uuid,
    /// 所属流
    pub stream_id: String,
    /// 流内版本，从 1 开始连续递增
    pub version: Version,
    /// 规范事件名称，用于选择编解码器
    pub event_type: String,
    /// 事件载荷
    pub payload: E,
    /// 同一批次共享的元数据
    pub metadata: Metadata,
    /// 持久化时间
    pub recorded_at: DateTime<Utc>,
}

impl<E> StoredEvent<E> {
    /// 取出事件载荷，丢弃信封
    pub fn into_payload(self) -> E {
        self.payload
    }
}
