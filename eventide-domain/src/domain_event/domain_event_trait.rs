use std::fmt;

/// 领域事件载荷需要满足的通用能力边界
///
/// 事件以枚举表达：每个变体是一种已登记的事件种类，并带有必填的规范名称，
/// 编解码器按该名称选择。通常由 `#[event]` 宏生成实现。
pub trait DomainEvent: Clone + fmt::Debug + Send + Sync + 'static {
    /// 全部事件种类的规范名称（与变体一一对应）
    const EVENT_TYPES: &'static [&'static str];

    /// 当前事件的规范名称（形如 `Opened` 或 `AccountEvent.Opened`）
    fn event_type(&self) -> &'static str;
}
