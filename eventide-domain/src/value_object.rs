//! 值对象（Value Object）
//!
//! 无标识、以值相等为准的对象；此处只承载流版本号。
//!

use serde::{Deserialize, Serialize};
use std::fmt;

/// 流版本号（用于乐观锁和并发控制）
///
/// 版本从 1 开始连续递增，0 表示空流。流的当前版本即其最后一个事件的版本。
///
/// # 示例
///
/// ```
/// use eventide_domain::value_object::Version;
///
/// let v1 = Version::new();
/// assert_eq!(v1.value(), 0);
/// assert!(v1.is_new());
///
/// let v2 = v1.next();
/// assert_eq!(v2.value(), 1);
/// assert!(!v2.is_new());
///
/// assert!(v2 > v1);
/// ```
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    /// 创建初始版本（版本号为 0）
    pub const fn new() -> Self {
        Self(0)
    }

    /// 从值创建版本号
    ///
    /// # 示例
    ///
    /// ```
    /// use eventide_domain::value_object::Version;
    ///
    /// let v = Version::from_value(5);
    /// assert_eq!(v.value(), 5);
    /// ```
    pub const fn from_value(value: u64) -> Self {
        Self(value)
    }

    /// 获取下一个版本号
    #[must_use]
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// 前进 `count` 个版本（批量追加后的版本）
    ///
    /// ```
    /// use eventide_domain::value_object::Version;
    ///
    /// assert_eq!(Version::from_value(2).advance(3), Version::from_value(5));
    /// ```
    #[must_use]
    pub const fn advance(&self, count: usize) -> Self {
        Self(self.0 + count as u64)
    }

    /// 回退 `count` 个版本，最低到 0
    #[must_use]
    pub const fn rewind(&self, count: usize) -> Self {
        Self(self.0.saturating_sub(count as u64))
    }

    /// 获取版本号的值
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// 检查是否为初始版本
    pub const fn is_new(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self::from_value(value)
    }
}

impl From<Version> for u64 {
    fn from(version: Version) -> Self {
        version.value()
    }
}

impl TryFrom<i64> for Version {
    type Error = std::num::TryFromIntError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u64::try_from(value).map(Self)
    }
}

impl TryFrom<Version> for i64 {
    type Error = std::num::TryFromIntError;

    fn try_from(version: Version) -> Result<Self, Self::Error> {
        i64::try_from(version.0)
    }
}
