//! 调用上下文（CallContext）
//!
//! 承载一次存储调用的横切信息：
//! - 业务语境：关联 ID、因果 ID、执行者、租户等，供元数据提取器读取；
//! - 取消信号（`CancellationToken`）与截止时间，工作单元在触发时整体回滚。
//!
use bon::Builder;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{DomainError, DomainResult};

/// 存储调用上下文
///
/// ```
/// use eventide_domain::context::CallContext;
///
/// let ctx = CallContext::builder()
///     .correlation_id("cor-1".to_string())
///     .tenant_id("t1".to_string())
///     .build();
/// assert_eq!(ctx.tenant_id(), Some("t1"));
/// assert!(!ctx.is_cancelled());
/// ```
#[derive(Builder, Default, Debug, Clone)]
pub struct CallContext {
    /// 关联ID
    correlation_id: Option<String>,
    /// 因果ID
    causation_id: Option<String>,
    /// 触发事件的主体类型（如用户、系统等）
    actor_type: Option<String>,
    /// 触发事件的主体ID
    actor_id: Option<String>,
    /// 租户ID
    tenant_id: Option<String>,
    /// 调用方持有的取消信号
    #[builder(default)]
    cancellation: CancellationToken,
    /// 截止时间，超过后工作单元被放弃并回滚
    deadline: Option<Instant>,
}

impl CallContext {
    /// 以当前时刻加 `timeout` 作为截止时间
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// 替换取消信号（例如接入上游请求的 token）
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn causation_id(&self) -> Option<&str> {
        self.causation_id.as_deref()
    }

    pub fn actor_type(&self) -> Option<&str> {
        self.actor_type.as_deref()
    }

    pub fn actor_id(&self) -> Option<&str> {
        self.actor_id.as_deref()
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// 在取消信号与截止时间的约束下执行一个工作单元。
    ///
    /// 任一信号先触发时 `work` 被丢弃：其中持有的事务随之回滚，
    /// 返回 `Cancelled` 或 `DeadlineExceeded`。
    pub async fn run<T, F>(&self, work: F) -> DomainResult<T>
    where
        F: Future<Output = DomainResult<T>>,
    {
        if self.is_cancelled() {
            return Err(DomainError::Cancelled);
        }

        let guarded = async {
            tokio::select! {
                biased;
                () = self.cancellation.cancelled() => Err(DomainError::Cancelled),
                res = work => res,
            }
        };

        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, guarded)
                .await
                .unwrap_or(Err(DomainError::DeadlineExceeded)),
            None => guarded.await,
        }
    }
}
