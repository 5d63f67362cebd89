//! SQLite 事务型事件存储
//!
//! - `events` 表以 `(stream_id, version)` 唯一约束作为并发冲突的最终防线：
//!   事务内先比对当前版本，再逐条插入；违反唯一约束时归类为 `VersionConflict`；
//! - 事件载荷由 `CodecRegistry` 按类型名编码，元数据以 JSON 文本保存；
//! - `snapshots` 表每个流一行，`ON CONFLICT` 覆盖写；
//! - 加载是普通查询，已提交的事件不可变，不需要事务。
//!
//! 追加以 `BEGIN IMMEDIATE` 开启事务：读取流头版本时已持有写锁，
//! 文件库上的并发写者由 `busy_timeout` 排队，落败者看到新版本并得到 `VersionConflict`。
//!
//! 取消或超时发生时进行中的事务被丢弃并回滚。
//!
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, Sqlite, Transaction};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::codec::CodecRegistry;
use crate::context::CallContext;
use crate::domain_event::{DomainEvent, Metadata, StoredEvent};
use crate::error::{DomainError, DomainResult};
use crate::persist::{EventStore, LoadedEvents, Snapshot, StoreConfig};
use crate::value_object::Version;

const CREATE_EVENTS: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    event_id    TEXT    NOT NULL PRIMARY KEY,
    stream_id   TEXT    NOT NULL,
    version     INTEGER NOT NULL,
    event_type  TEXT    NOT NULL,
    payload     BLOB    NOT NULL,
    metadata    TEXT    NOT NULL,
    recorded_at TEXT    NOT NULL,
    UNIQUE (stream_id, version)
)
"#;

const CREATE_SNAPSHOTS: &str = r#"
CREATE TABLE IF NOT EXISTS snapshots (
    stream_id TEXT    NOT NULL PRIMARY KEY,
    version   INTEGER NOT NULL,
    state     TEXT    NOT NULL,
    taken_at  TEXT    NOT NULL
)
"#;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const BEGIN_APPEND: &str = "BEGIN IMMEDIATE";

/// 打开连接池
///
/// 内存数据库（`sqlite::memory:` 或 `mode=memory`）只保留一个常驻连接，
/// 使所有调用方看到同一个数据库。
pub async fn connect(url: &str) -> DomainResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = if is_memory_url(url) {
        SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new().connect_with(options).await?
    };

    Ok(pool)
}

fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

#[derive(FromRow)]
struct EventRow {
    event_id: String,
    stream_id: String,
    version: i64,
    event_type: String,
    payload: Vec<u8>,
    metadata: String,
    recorded_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct SnapshotRow {
    version: i64,
    state: String,
    taken_at: DateTime<Utc>,
}

/// SQLite 事件存储
pub struct SqliteEventStore<E> {
    pool: SqlitePool,
    codecs: CodecRegistry<E>,
    config: StoreConfig,
}

impl<E> SqliteEventStore<E>
where
    E: DomainEvent,
{
    pub fn new(pool: SqlitePool, codecs: CodecRegistry<E>) -> Self {
        Self::with_config(pool, codecs, StoreConfig::default())
    }

    pub fn with_config(pool: SqlitePool, codecs: CodecRegistry<E>, config: StoreConfig) -> Self {
        Self {
            pool,
            codecs,
            config,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// 建表（幂等）
    pub async fn migrate(&self) -> DomainResult<()> {
        sqlx::query(CREATE_EVENTS).execute(&self.pool).await?;
        sqlx::query(CREATE_SNAPSHOTS).execute(&self.pool).await?;
        Ok(())
    }

    async fn current_version(
        tx: &mut Transaction<'_, Sqlite>,
        stream_id: &str,
    ) -> DomainResult<Version> {
        let current: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM events WHERE stream_id = ?")
                .bind(stream_id)
                .fetch_one(&mut **tx)
                .await?;
        Ok(Version::try_from(current)?)
    }

    fn decode_row(&self, row: EventRow) -> DomainResult<StoredEvent<E>> {
        let payload = self.codecs.decode(&row.event_type, &row.payload)?;
        let metadata: Metadata =
            serde_json::from_str(&row.metadata).map_err(|e| DomainError::Decode {
                event_type: row.event_type.clone(),
                reason: format!("metadata: {e}"),
            })?;

        Ok(StoredEvent {
            event_id: Uuid::parse_str(&row.event_id)?,
            stream_id: row.stream_id,
            version: Version::try_from(row.version)?,
            event_type: row.event_type,
            payload,
            metadata,
            recorded_at: row.recorded_at,
        })
    }
}

/// 把唯一约束冲突归类为版本冲突，其余按数据库错误处理
fn classify(err: sqlx::Error, stream_id: &str, expected: Version, actual: Version) -> DomainError {
    match err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            warn!(%stream_id, %expected, %actual, "unique (stream_id, version) violated");
            DomainError::VersionConflict {
                stream_id: stream_id.to_string(),
                expected,
                actual,
            }
        }
        other => DomainError::from(other),
    }
}

#[async_trait]
impl<E> EventStore for SqliteEventStore<E>
where
    E: DomainEvent,
{
    type Event = E;

    #[instrument(skip_all, fields(stream_id = %stream_id, from = %from_version))]
    async fn load(
        &self,
        ctx: &CallContext,
        stream_id: &str,
        from_version: Version,
    ) -> DomainResult<LoadedEvents<E>> {
        ctx.run(async {
            let rows: Vec<EventRow> = sqlx::query_as(
                r#"
                SELECT event_id, stream_id, version, event_type, payload, metadata, recorded_at
                FROM events
                WHERE stream_id = ? AND version > ?
                ORDER BY version ASC
                "#,
            )
            .bind(stream_id)
            .bind(i64::try_from(from_version)?)
            .fetch_all(&self.pool)
            .await?;

            let events = rows
                .into_iter()
                .map(|row| self.decode_row(row))
                .collect::<DomainResult<Vec<_>>>()?;

            debug!(count = events.len(), "loaded events");
            Ok(LoadedEvents::new(events, from_version))
        })
        .await
    }

    #[instrument(skip_all, fields(stream_id = %stream_id, expected = %expected_version))]
    async fn append(
        &self,
        ctx: &CallContext,
        stream_id: &str,
        expected_version: Version,
        events: Vec<E>,
        metadata: Metadata,
    ) -> DomainResult<Version> {
        ctx.run(async {
            let metadata = self.config.resolve_metadata(ctx, metadata);
            let metadata_json = serde_json::to_string(&metadata)?;

            let mut tx = self.pool.begin_with(BEGIN_APPEND).await?;

            let current = Self::current_version(&mut tx, stream_id).await?;
            if current != expected_version {
                warn!(actual = %current, "version conflict");
                return Err(DomainError::VersionConflict {
                    stream_id: stream_id.to_string(),
                    expected: expected_version,
                    actual: current,
                });
            }

            if events.is_empty() {
                tx.commit().await?;
                return Ok(expected_version);
            }

            let count = events.len();
            let new_version = expected_version.advance(count);
            let recorded_at = Utc::now();
            let mut version = expected_version;
            for event in &events {
                version = version.next();
                // 编码失败时提前返回，事务随之丢弃回滚
                let payload = self.codecs.encode(event)?;

                sqlx::query(
                    r#"
                    INSERT INTO events
                        (event_id, stream_id, version, event_type, payload, metadata, recorded_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(Uuid::now_v7().to_string())
                .bind(stream_id)
                .bind(i64::try_from(version)?)
                .bind(event.event_type())
                .bind(payload)
                .bind(&metadata_json)
                .bind(recorded_at)
                .execute(&mut *tx)
                .await
                .map_err(|e| classify(e, stream_id, expected_version, version))?;
            }

            tx.commit()
                .await
                .map_err(|e| classify(e, stream_id, expected_version, new_version))?;

            debug!(count, new_version = %new_version, "appended events");
            Ok(new_version)
        })
        .await
    }

    #[instrument(skip_all, fields(stream_id = %stream_id, version = %version))]
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
        ctx.run(async {
            let state = serde_json::to_string(state).map_err(|e| DomainError::Snapshot {
                reason: e.to_string(),
            })?;

            sqlx::query(
                r#"
                INSERT INTO snapshots (stream_id, version, state, taken_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(stream_id) DO UPDATE SET
                    version = excluded.version,
                    state = excluded.state,
                    taken_at = excluded.taken_at
                "#,
            )
            .bind(stream_id)
            .bind(i64::try_from(version)?)
            .bind(state)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

            debug!("saved snapshot");
            Ok(())
        })
        .await
    }

    #[instrument(skip_all, fields(stream_id = %stream_id))]
    async fn load_snapshot<S>(
        &self,
        ctx: &CallContext,
        stream_id: &str,
    ) -> DomainResult<Option<Snapshot<S>>>
    where
        S: DeserializeOwned + Send,
    {
        ctx.run(async {
            let row: Option<SnapshotRow> = sqlx::query_as(
                "SELECT version, state, taken_at FROM snapshots WHERE stream_id = ?",
            )
            .bind(stream_id)
            .fetch_optional(&self.pool)
            .await?;

            let Some(row) = row else {
                return Ok(None);
            };

            let state = serde_json::from_str(&row.state).map_err(|e| DomainError::Snapshot {
                reason: e.to_string(),
            })?;

            Ok(Some(Snapshot {
                version: Version::try_from(row.version)?,
                state,
                taken_at: row.taken_at,
            }))
        })
        .await
    }
}
