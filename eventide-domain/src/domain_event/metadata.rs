use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::collections::btree_map::Iter;
use std::sync::Arc;

use crate::context::CallContext;

/// 随一次追加写入的元数据（租户、用户、关联 ID 等）
///
/// 值语义且不可变：所有“修改”都返回新实例。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, Value>);

/// 从调用上下文构造元数据；追加时与显式元数据合并，显式值优先
pub type MetadataExtractor = Arc<dyn Fn(&CallContext) -> Metadata + Send + Sync>;

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// 返回追加了 `key = value` 的新元数据
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// 右偏合并：`other` 中的键覆盖 `self`，两者均不被修改
    ///
    /// ```
    /// use eventide_domain::domain_event::Metadata;
    ///
    /// let extracted = Metadata::new().with("tenant", "t1").with("user", "u1");
    /// let explicit = Metadata::new().with("user", "u2");
    /// let merged = extracted.merge(&explicit);
    ///
    /// assert_eq!(merged.get("tenant"), Some(&"t1".into()));
    /// assert_eq!(merged.get("user"), Some(&"u2".into()));
    /// assert_eq!(extracted.get("user"), Some(&"u1".into()));
    /// ```
    #[must_use]
    pub fn merge(&self, other: &Metadata) -> Metadata {
        let mut out = self.0.clone();
        out.extend(other.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        Metadata(out)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> Iter<'_, String, Value> {
        self.0.iter()
    }

    /// 按存储配置解析最终写入的元数据：提取值在前，显式值覆盖
    pub(crate) fn resolve(
        extractor: Option<&MetadataExtractor>,
        ctx: &CallContext,
        explicit: Metadata,
    ) -> Metadata {
        match extractor {
            Some(extract) => extract(ctx).merge(&explicit),
            None => explicit,
        }
    }
}

impl<K, V> FromIterator<(K, V)> for Metadata
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Metadata(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl<'a> IntoIterator for &'a Metadata {
    type Item = (&'a String, &'a Value);
    type IntoIter = Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// 默认提取器：把调用上下文中的业务字段复制为元数据
pub fn context_metadata(ctx: &CallContext) -> Metadata {
    [
        ("correlation_id", ctx.correlation_id()),
        ("causation_id", ctx.causation_id()),
        ("actor_type", ctx.actor_type()),
        ("actor_id", ctx.actor_id()),
        ("tenant_id", ctx.tenant_id()),
    ]
    .into_iter()
    .filter_map(|(k, v)| v.map(|v| (k, v.to_string())))
    .collect()
}
