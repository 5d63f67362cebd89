//! 内存事件存储
//!
//! 所有流与快照共享一把读写锁：`append`/`save_snapshot` 持有写锁，
//! `load`/`load_snapshot` 持有读锁。跨流写入因此串行化，适用于测试、原型与本地运行；
//! 进程重启后数据丢失。
//!
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::collections::HashMap;
use std::marker::PhantomData;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::context::CallContext;
use crate::domain_event::{DomainEvent, Metadata, StoredEvent};
use crate::error::{DomainError, DomainResult};
use crate::persist::{EventStore, LoadedEvents, Snapshot, StoreConfig};
use crate::value_object::Version;

struct StoreState<E> {
    streams: HashMap<String, Vec<StoredEvent<E>>>,
    // 快照以 JSON 值保存，读取时再还原为调用方要求的类型
    snapshots: HashMap<String, Snapshot<Value>>,
}

impl<E> Default for StoreState<E> {
    fn default() -> Self {
        Self {
            streams: HashMap::new(),
            snapshots: HashMap::new(),
        }
    }
}

/// 内存事件存储（并发安全）
pub struct InMemoryEventStore<E> {
    state: RwLock<StoreState<E>>,
    config: StoreConfig,
    _marker: PhantomData<fn() -> E>,
}

impl<E> Default for InMemoryEventStore<E> {
    fn default() -> Self {
        Self::with_config(StoreConfig::default())
    }
}

impl<E> InMemoryEventStore<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            config,
            _marker: PhantomData,
        }
    }

    /// 流的当前版本（空流为 0）
    pub fn current_version(&self, stream_id: &str) -> Version {
        let state = self.state.read();
        Self::version_of(&state, stream_id)
    }

    fn version_of(state: &StoreState<E>, stream_id: &str) -> Version {
        state
            .streams
            .get(stream_id)
            .and_then(|events| events.last())
            .map_or(Version::new(), |e| e.version)
    }
}

#[async_trait]
impl<E> EventStore for InMemoryEventStore<E>
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
            let state = self.state.read();
            let events: Vec<StoredEvent<E>> = state
                .streams
                .get(stream_id)
                .map(|stream| {
                    stream
                        .iter()
                        .filter(|e| e.version > from_version)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();

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

            let mut state = self.state.write();
            let current = Self::version_of(&state, stream_id);
            if current != expected_version {
                warn!(actual = %current, "version conflict");
                return Err(DomainError::VersionConflict {
                    stream_id: stream_id.to_string(),
                    expected: expected_version,
                    actual: current,
                });
            }

            if events.is_empty() {
                return Ok(expected_version);
            }

            let count = events.len();
            let new_version = current.advance(count);
            let recorded_at = Utc::now();
            let stream = state.streams.entry(stream_id.to_string()).or_default();
            for (offset, payload) in events.into_iter().enumerate() {
                stream.push(StoredEvent {
                    event_id: Uuid::now_v7(),
                    stream_id: stream_id.to_string(),
                    version: current.advance(offset + 1),
                    event_type: payload.event_type().to_string(),
                    payload,
                    metadata: metadata.clone(),
                    recorded_at,
                });
            }

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
            let value = serde_json::to_value(state).map_err(|e| DomainError::Snapshot {
                reason: e.to_string(),
            })?;

            self.state.write().snapshots.insert(
                stream_id.to_string(),
                Snapshot {
                    version,
                    state: value,
                    taken_at: Utc::now(),
                },
            );
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
            let Some(snapshot) = self.state.read().snapshots.get(stream_id).cloned() else {
                return Ok(None);
            };

            let state = serde_json::from_value(snapshot.state).map_err(|e| {
                DomainError::Snapshot {
                    reason: e.to_string(),
                }
            })?;

            Ok(Some(Snapshot {
                version: snapshot.version,
                state,
                taken_at: snapshot.taken_at,
            }))
        })
        .await
    }
}
