//! 领域层统一错误定义
//!
//! 聚焦并发冲突、编解码、存储事务、快照与重放校验等最小必要集合，
//! 便于在各后端实现中统一转换为 `DomainError`。
//!
use crate::value_object::Version;
use thiserror::Error;

/// 统一错误类型（基础库最小必要集）
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DomainError {
    // --- 并发控制 ---
    /// 追加时 `expected` 与流的真实版本不一致；调用方可重新加载后重试
    #[error("version conflict on stream {stream_id}: expected={expected}, actual={actual}")]
    VersionConflict {
        stream_id: String,
        expected: Version,
        actual: Version,
    },

    // --- 编解码 ---
    #[error("no codec registered for event type {event_type:?}")]
    MissingCodec { event_type: String },
    #[error("encode failed: type={event_type}, reason={reason}")]
    Encode { event_type: String, reason: String },
    #[error("decode failed: type={event_type}, reason={reason}")]
    Decode { event_type: String, reason: String },
    #[error("type mismatch: expected={expected}, found={found}")]
    TypeMismatch { expected: String, found: String },
    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },
    #[error("parse error: {reason}")]
    Parse { reason: String },

    // --- 仓储/持久化 ---
    #[error("database error: {reason}")]
    Database { reason: String },
    #[error("snapshot error: {reason}")]
    Snapshot { reason: String },
    #[error("replay mismatch on stream {stream_id}: aggregate={aggregate}, store={store}")]
    ReplayMismatch {
        stream_id: String,
        aggregate: Version,
        store: Version,
    },

    // --- 调用方信号 ---
    #[error("operation cancelled")]
    Cancelled,
    #[error("deadline exceeded")]
    DeadlineExceeded,

    // --- 领域规则/命令与状态 ---
    #[error("invalid command: {reason}")]
    InvalidCommand { reason: String },
    #[error("invalid state: {reason}")]
    InvalidState { reason: String },
    #[error("not found: {reason}")]
    NotFound { reason: String },
}

impl DomainError {
    /// 是否为乐观并发冲突（可通过“重新加载 → 重新执行命令 → 再次追加”恢复）
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, DomainError::VersionConflict { .. })
    }
}

/// 统一 Result 类型别名
pub type DomainResult<T> = Result<T, DomainError>;

// ---- Cross-crate conversions for infrastructure convenience ----
// 允许在基础设施层直接使用 `?` 将 sqlx/uuid 等错误转换为 DomainError

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DomainError::NotFound {
                reason: "row not found".to_string(),
            },
            other => DomainError::Database {
                reason: other.to_string(),
            },
        }
    }
}

impl From<uuid::Error> for DomainError {
    fn from(err: uuid::Error) -> Self {
        DomainError::Parse {
            reason: err.to_string(),
        }
    }
}

impl From<std::num::TryFromIntError> for DomainError {
    fn from(err: std::num::TryFromIntError) -> Self {
        DomainError::Parse {
            reason: err.to_string(),
        }
    }
}
