//! 事件宏（eventide-macros）
//!
//! 将一个枚举声明为一组已登记的事件种类：每个变体对应一个必填的规范名称，
//! 编解码注册表据此在追加/加载时选择编解码器，无需运行时类型反射。
//!
use proc_macro::TokenStream;

mod event;
mod utils;

/// 事件宏
///
/// - 追加派生：`Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize`（已存在则去重）
/// - 生成 `::eventide_domain::domain_event::DomainEvent` 实现
/// - 枚举级：`#[event(namespace = "account")]` 将默认名称改为 `account.Variant`（默认 `Enum.Variant`）
/// - 变体级：`#[event(event_type = "Opened")]` 覆写规范名称
///
/// ```ignore
/// #[event]
/// enum AccountEvent {
///     #[event(event_type = "AccountOpened")]
///     Opened { account_id: String, owner: String, initial: i64 },
///     Deposited { amount: i64 }, // "AccountEvent.Deposited"
/// }
/// ```
#[proc_macro_attribute]
pub fn event(attr: TokenStream, item: TokenStream) -> TokenStream {
    event::expand(attr, item)
}
