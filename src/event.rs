//! 领域事件 - 宿主客户端产生的好友上下线与消息事件

use serde::{Deserialize, Serialize};
use std::fmt;

/// 账号 ID（宿主内稳定、不透明）
pub type AccountId = String;
/// 好友 ID（在账号范围内唯一）
pub type BuddyId = String;

/// 联系人复合键：(account_id, buddy_id)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuddyKey {
    pub account_id: AccountId,
    pub buddy_id: BuddyId,
}

impl BuddyKey {
    pub fn new(account_id: impl Into<String>, buddy_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            buddy_id: buddy_id.into(),
        }
    }
}

impl fmt::Display for BuddyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.account_id, self.buddy_id)
    }
}

/// 好友列表中的联系人
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Buddy {
    pub account_id: AccountId,
    pub buddy_id: BuddyId,
    /// 本地别名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// 服务端别名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_alias: Option<String>,
}

impl Buddy {
    pub fn new(account_id: impl Into<String>, buddy_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            buddy_id: buddy_id.into(),
            alias: None,
            server_alias: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_server_alias(mut self, alias: impl Into<String>) -> Self {
        self.server_alias = Some(alias.into());
        self
    }

    pub fn key(&self) -> BuddyKey {
        BuddyKey::new(&self.account_id, &self.buddy_id)
    }

    /// 显示名：本地别名 > 服务端别名 > 原始 ID
    pub fn best_name(&self) -> &str {
        [self.alias.as_deref(), self.server_alias.as_deref()]
            .into_iter()
            .flatten()
            .find(|name| !name.trim().is_empty())
            .unwrap_or(&self.buddy_id)
    }
}

/// 会话类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    /// 一对一私聊
    Im,
    /// 多人聊天室
    Chat,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationKind::Im => "im",
            ConversationKind::Chat => "chat",
        }
    }
}

/// 分类器输入事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    /// 好友上线
    SignOn {
        account_id: AccountId,
        buddy_id: BuddyId,
    },
    /// 好友下线
    SignOff {
        account_id: AccountId,
        buddy_id: BuddyId,
    },
    /// 收到消息
    MessageReceived {
        account_id: AccountId,
        sender_id: BuddyId,
        raw_body: String,
        conversation_kind: ConversationKind,
        has_focus: bool,
        is_new_conversation: bool,
    },
}

impl DomainEvent {
    pub fn account_id(&self) -> &str {
        match self {
            DomainEvent::SignOn { account_id, .. }
            | DomainEvent::SignOff { account_id, .. }
            | DomainEvent::MessageReceived { account_id, .. } => account_id,
        }
    }

    /// 事件涉及的联系人
    pub fn buddy_key(&self) -> BuddyKey {
        match self {
            DomainEvent::SignOn { account_id, buddy_id }
            | DomainEvent::SignOff { account_id, buddy_id } => BuddyKey::new(account_id, buddy_id),
            DomainEvent::MessageReceived {
                account_id,
                sender_id,
                ..
            } => BuddyKey::new(account_id, sender_id),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            DomainEvent::SignOn { .. } => EventKind::SignOn,
            DomainEvent::SignOff { .. } => EventKind::SignOff,
            DomainEvent::MessageReceived { .. } => EventKind::Message,
        }
    }
}

/// 事件类别（用于开关配置与日志）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    SignOn,
    SignOff,
    Message,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::SignOn => "sign_on",
            EventKind::SignOff => "sign_off",
            EventKind::Message => "message",
        };
        f.write_str(name)
    }
}
