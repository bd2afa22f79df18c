//! 事件分类器 - 决定是否通知以及通知内容
//!
//! 分类器从不失败：任何无法处理的情况都归为 `Suppressed`。

use std::fmt;

use super::sanitizer;
use super::suppressor::SignOnSuppressor;
use crate::config::NotifyConfig;
use crate::event::{Buddy, BuddyKey, DomainEvent, EventKind};
use crate::host::HostClient;

/// 通知意图
#[derive(Debug, Clone, PartialEq)]
pub struct NotifyIntent {
    pub key: BuddyKey,
    pub buddy: Buddy,
    pub kind: EventKind,
    pub title: String,
    /// 已清洗的正文，上下线事件为空
    pub body: String,
}

/// 抑制原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    /// 该类事件的通知开关关闭
    Disabled(EventKind),
    /// 账号处于登录抑制窗口
    SignOnFlood,
    /// 联系人被屏蔽
    Blocked,
    /// 会话窗口正有焦点
    Focused,
    /// 仅通知新会话，而该会话已有历史
    ExistingConversation,
    /// 不在好友列表中的联系人
    UnknownContact,
}

impl fmt::Display for SuppressReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuppressReason::Disabled(kind) => write!(f, "{} notifications disabled", kind),
            SuppressReason::SignOnFlood => f.write_str("account inside sign-on window"),
            SuppressReason::Blocked => f.write_str("contact blocked"),
            SuppressReason::Focused => f.write_str("conversation has focus"),
            SuppressReason::ExistingConversation => f.write_str("conversation has history"),
            SuppressReason::UnknownContact => f.write_str("unknown contact"),
        }
    }
}

/// 分类结果
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Notify(NotifyIntent),
    Suppressed(SuppressReason),
}

impl Decision {
    pub fn is_notify(&self) -> bool {
        matches!(self, Decision::Notify(_))
    }
}

/// 对事件分类
///
/// 检查顺序：开关 → 登录窗口 → 会话状态 → 联系人存在 → 隐私。
pub fn classify(
    event: &DomainEvent,
    config: &NotifyConfig,
    suppressor: &SignOnSuppressor,
    host: &dyn HostClient,
) -> Decision {
    match event {
        DomainEvent::SignOn { account_id, .. } => {
            if !config.notify_sign_on {
                return Decision::Suppressed(SuppressReason::Disabled(EventKind::SignOn));
            }
            if suppressor.is_suppressed(account_id) {
                return Decision::Suppressed(SuppressReason::SignOnFlood);
            }
            presence_intent(event, config, host, "signed on")
        }
        DomainEvent::SignOff { .. } => {
            if !config.notify_sign_off {
                return Decision::Suppressed(SuppressReason::Disabled(EventKind::SignOff));
            }
            presence_intent(event, config, host, "signed off")
        }
        DomainEvent::MessageReceived {
            raw_body,
            has_focus,
            is_new_conversation,
            ..
        } => {
            if !config.notify_new_message {
                return Decision::Suppressed(SuppressReason::Disabled(EventKind::Message));
            }
            if *has_focus {
                return Decision::Suppressed(SuppressReason::Focused);
            }
            if config.new_conversations_only && !*is_new_conversation {
                return Decision::Suppressed(SuppressReason::ExistingConversation);
            }
            let buddy = match allowed_buddy(event, config, host) {
                Ok(buddy) => buddy,
                Err(reason) => return Decision::Suppressed(reason),
            };
            let plain = host.strip_markup(raw_body);
            Decision::Notify(NotifyIntent {
                key: event.buddy_key(),
                title: format!("{} says:", display_name(&buddy, config)),
                body: sanitizer::sanitize(&plain, config.body_char_budget),
                kind: EventKind::Message,
                buddy,
            })
        }
    }
}

fn presence_intent(
    event: &DomainEvent,
    config: &NotifyConfig,
    host: &dyn HostClient,
    verb: &str,
) -> Decision {
    match allowed_buddy(event, config, host) {
        Ok(buddy) => Decision::Notify(NotifyIntent {
            key: event.buddy_key(),
            title: format!("{} {}", display_name(&buddy, config), verb),
            body: String::new(),
            kind: event.kind(),
            buddy,
        }),
        Err(reason) => Decision::Suppressed(reason),
    }
}

/// 查找联系人并做隐私检查
///
/// 被屏蔽的联系人只有在 `notify_blocked_users` 打开时才通知。
fn allowed_buddy(
    event: &DomainEvent,
    config: &NotifyConfig,
    host: &dyn HostClient,
) -> Result<Buddy, SuppressReason> {
    let key = event.buddy_key();
    let buddy = host
        .find_buddy(&key.account_id, &key.buddy_id)
        .ok_or(SuppressReason::UnknownContact)?;

    if !config.notify_blocked_users && host.is_blocked(&key.account_id, &key.buddy_id) {
        return Err(SuppressReason::Blocked);
    }
    Ok(buddy)
}

fn display_name(buddy: &Buddy, config: &NotifyConfig) -> String {
    sanitizer::truncate(buddy.best_name(), config.name_char_budget)
}
