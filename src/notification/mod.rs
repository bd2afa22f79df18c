//! 通知策略层 - 决定何时通知、通知什么、如何合并
//!
//! # 数据流
//! 领域事件 → `classifier`（开关 / 登录抑制 / 隐私）→ `sanitizer`
//! → `store`（新建或更新）→ `dispatcher`（提交 sink）→ sink 回调 → `store` 移除
//!
//! # 使用示例
//! ```ignore
//! use buddy_notify::notification::{classify, Decision};
//!
//! if let Decision::Notify(intent) = classify(&event, &config, &suppressor, host.as_ref()) {
//!     dispatcher.present(&intent, &mut store, host.as_ref());
//! }
//! ```

pub mod classifier;
pub mod dispatcher;
pub mod sanitizer;
pub mod sink;
pub mod sinks;
pub mod store;
pub mod suppressor;

pub use classifier::{classify, Decision, NotifyIntent, SuppressReason};
pub use dispatcher::{PresentOutcome, PresentationDispatcher, SHOW_ACTION};
pub use sanitizer::{escape_markup, sanitize, strip_markup, truncate};
pub use sink::{Icon, NotificationContent, NotificationHandle, NotificationSink, SinkEvent, SinkEventSender};
pub use sinks::{LogSink, NotifySendConfig, NotifySendSink};
pub use store::{CoalescingStore, NotificationRecord, Upsert};
pub use suppressor::{AccountPhase, SettleReason, SignOnSuppressor};
