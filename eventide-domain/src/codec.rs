//! 事件编解码注册表
//!
//! 规范事件名称 → 编解码器。追加时按事件的 `event_type()` 选择编码器，
//! 加载时按存储的类型名选择解码器；未登记的名称返回 `MissingCodec`。
//!
use serde::{Serialize, de::DeserializeOwned};
use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use crate::domain_event::DomainEvent;
use crate::error::{DomainError, DomainResult};

/// 编解码器返回的底层错误
pub type CodecError = Box<dyn StdError + Send + Sync>;

/// 单个事件种类的编解码器
pub trait EventCodec<E>: Send + Sync {
    fn encode(&self, event: &E) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, bytes: &[u8]) -> Result<E, CodecError>;
}

/// 基于 `serde_json` 的编解码器
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<E> EventCodec<E> for JsonCodec
where
    E: Serialize + DeserializeOwned,
{
    fn encode(&self, event: &E) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(event)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<E, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// 事件类型名到编解码器的映射，作为显式配置传入存储构造函数
pub struct CodecRegistry<E> {
    codecs: HashMap<String, Arc<dyn EventCodec<E>>>,
}

impl<E> Default for CodecRegistry<E> {
    fn default() -> Self {
        Self {
            codecs: HashMap::new(),
        }
    }
}

impl<E> Clone for CodecRegistry<E> {
    fn clone(&self) -> Self {
        Self {
            codecs: self.codecs.clone(),
        }
    }
}

impl<E> fmt::Debug for CodecRegistry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.codecs.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("CodecRegistry")
            .field("event_types", &names)
            .finish()
    }
}

impl<E> CodecRegistry<E>
where
    E: DomainEvent,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记（或替换）某个事件类型的编解码器
    #[must_use]
    pub fn register(
        mut self,
        event_type: impl Into<String>,
        codec: impl EventCodec<E> + 'static,
    ) -> Self {
        self.codecs.insert(event_type.into(), Arc::new(codec));
        self
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.codecs.contains_key(event_type)
    }

    fn codec(&self, event_type: &str) -> DomainResult<&dyn EventCodec<E>> {
        self.codecs
            .get(event_type)
            .map(AsRef::as_ref)
            .ok_or_else(|| DomainError::MissingCodec {
                event_type: event_type.to_string(),
            })
    }

    /// 按事件自身的规范名称编码
    pub fn encode(&self, event: &E) -> DomainResult<Vec<u8>> {
        let event_type = event.event_type();
        self.codec(event_type)?
            .encode(event)
            .map_err(|e| DomainError::Encode {
                event_type: event_type.to_string(),
                reason: e.to_string(),
            })
    }

    /// 按存储的类型名解码，并校验载荷确实属于该类型
    pub fn decode(&self, event_type: &str, bytes: &[u8]) -> DomainResult<E> {
        let event = self
            .codec(event_type)?
            .decode(bytes)
            .map_err(|e| DomainError::Decode {
                event_type: event_type.to_string(),
                reason: e.to_string(),
            })?;

        if event.event_type() != event_type {
            return Err(DomainError::TypeMismatch {
                expected: event_type.to_string(),
                found: event.event_type().to_string(),
            });
        }

        Ok(event)
    }
}

impl<E> CodecRegistry<E>
where
    E: DomainEvent + Serialize + DeserializeOwned,
{
    /// 为 `E::EVENT_TYPES` 中的每个事件类型登记 `JsonCodec`
    pub fn json() -> Self {
        E::EVENT_TYPES
            .iter()
            .fold(Self::new(), |reg, name| reg.register(*name, JsonCodec))
    }
}
