//! 宿主客户端边界
//!
//! - `HostClient`：引擎向宿主查询联系人、会话、图标、连接状态
//! - `EventSource`：引擎订阅宿主信号，返回 `Subscription`，drop 即退订
//! - `HostSignal`：宿主投递给引擎的原始信号

pub mod memory;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::engine::EngineSender;
use crate::event::{AccountId, Buddy, BuddyId, ConversationKind};
use crate::notification::sanitizer;

pub use memory::{HostFixture, StaticHost};

/// 账号连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// 没有连接（离线或登录中止）
    Disconnected,
    /// 正在建立连接
    Connecting,
    /// 完全连接
    Connected,
}

/// 宿主内的会话引用
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationHandle {
    pub account_id: AccountId,
    /// 私聊为对方 ID，聊天室为房间名
    pub name: String,
    pub kind: ConversationKind,
}

impl ConversationHandle {
    pub fn new(account_id: impl Into<String>, name: impl Into<String>, kind: ConversationKind) -> Self {
        Self {
            account_id: account_id.into(),
            name: name.into(),
            kind,
        }
    }
}

impl fmt::Display for ConversationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.kind.as_str(), self.account_id, self.name)
    }
}

/// 多人聊天室信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRoom {
    pub name: String,
    /// 自己在该聊天室中的昵称
    #[serde(default)]
    pub own_nick: Option<String>,
}

/// 引擎对宿主的查询接口
pub trait HostClient: Send + Sync {
    /// 查找好友；不在好友列表中返回 None
    fn find_buddy(&self, account_id: &str, buddy_id: &str) -> Option<Buddy>;

    /// 隐私设置是否屏蔽该联系人
    fn is_blocked(&self, account_id: &str, contact_id: &str) -> bool;

    /// 查找已存在的会话
    fn find_conversation(
        &self,
        account_id: &str,
        name: &str,
        kind: ConversationKind,
    ) -> Option<ConversationHandle>;

    /// 查找或新建与联系人的私聊会话
    fn find_or_create_conversation(&self, account_id: &str, contact_id: &str) -> ConversationHandle;

    /// 把会话窗口调到前台
    fn present_conversation(&self, conversation: &ConversationHandle);

    fn has_focus(&self, conversation: &ConversationHandle) -> bool;

    fn has_prior_history(&self, conversation: &ConversationHandle) -> bool;

    /// 已缓存的联系人头像
    fn cached_avatar(&self, buddy: &Buddy) -> Option<Arc<[u8]>>;

    /// 协议默认图标路径
    fn protocol_icon(&self, account_id: &str) -> Option<String>;

    fn connection_state(&self, account_id: &str) -> ConnectionState;

    /// 消息标记转纯文本
    fn strip_markup(&self, raw: &str) -> String {
        sanitizer::strip_markup(raw)
    }
}

/// 宿主信号主题
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    BuddySignedOn,
    BuddySignedOff,
    AccountConnected,
    ImReceived,
    ChatReceived,
}

impl Topic {
    pub const ALL: [Topic; 5] = [
        Topic::BuddySignedOn,
        Topic::BuddySignedOff,
        Topic::AccountConnected,
        Topic::ImReceived,
        Topic::ChatReceived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::BuddySignedOn => "buddy-signed-on",
            Topic::BuddySignedOff => "buddy-signed-off",
            Topic::AccountConnected => "signed-on",
            Topic::ImReceived => "received-im-msg",
            Topic::ChatReceived => "received-chat-msg",
        }
    }
}

/// 宿主投递给引擎的信号
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum HostSignal {
    BuddySignedOn {
        account_id: AccountId,
        buddy_id: BuddyId,
    },
    BuddySignedOff {
        account_id: AccountId,
        buddy_id: BuddyId,
    },
    AccountConnected {
        account_id: AccountId,
    },
    MessageReceived {
        account_id: AccountId,
        sender_id: BuddyId,
        raw_body: String,
        #[serde(default = "default_kind")]
        conversation_kind: ConversationKind,
        /// 宿主消息标志位（仅记录日志）
        #[serde(default)]
        flags: u32,
    },
    ChatMessageReceived {
        account_id: AccountId,
        sender_id: BuddyId,
        raw_body: String,
        chat: ChatRoom,
    },
}

fn default_kind() -> ConversationKind {
    ConversationKind::Im
}

impl HostSignal {
    pub fn topic(&self) -> Topic {
        match self {
            HostSignal::BuddySignedOn { .. } => Topic::BuddySignedOn,
            HostSignal::BuddySignedOff { .. } => Topic::BuddySignedOff,
            HostSignal::AccountConnected { .. } => Topic::AccountConnected,
            HostSignal::MessageReceived { .. } => Topic::ImReceived,
            HostSignal::ChatMessageReceived { .. } => Topic::ChatReceived,
        }
    }
}

/// 信号订阅接口
pub trait EventSource {
    fn subscribe(&self, topic: Topic, events: EngineSender) -> Subscription;
}

/// 订阅凭据，drop 时退订
pub struct Subscription {
    topic: Topic,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(topic: Topic, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            topic,
            release: Some(Box::new(release)),
        }
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("active", &self.release.is_some())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}
