//! Buddy Notify - 把即时通讯客户端的好友上下线和消息事件转成桌面通知
//!
//! 决定何时通知、通知什么，以及同一联系人的弹窗如何合并更新；
//! 账号刚登录时抑制好友列表重放产生的上线洪峰。

pub mod config;
pub mod engine;
pub mod event;
pub mod host;
pub mod notification;

pub use config::NotifyConfig;
pub use engine::{Engine, EngineInput, EngineSender};
pub use event::{AccountId, Buddy, BuddyId, BuddyKey, ConversationKind, DomainEvent, EventKind};
pub use host::{
    ChatRoom, ConnectionState, ConversationHandle, EventSource, HostClient, HostFixture, HostSignal,
    StaticHost, Subscription, Topic,
};
pub use notification::{
    classify, CoalescingStore, Decision, LogSink, NotificationHandle, NotificationSink, NotifyIntent,
    NotifySendConfig, NotifySendSink, PresentOutcome, PresentationDispatcher, SignOnSuppressor,
    SinkEvent, SuppressReason,
};
