//! 内存宿主 - 从 JSON 名单构建，供 replay 命令和测试使用

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use super::{ConnectionState, ConversationHandle, EventSource, HostClient, HostSignal, Subscription, Topic};
use crate::engine::EngineSender;
use crate::event::{Buddy, BuddyKey, ConversationKind};

/// 账号描述
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountFixture {
    pub id: String,
    /// 协议名，用于查找协议图标（如 "jabber"）
    pub protocol: String,
    #[serde(default = "default_state")]
    pub state: ConnectionState,
}

fn default_state() -> ConnectionState {
    ConnectionState::Connected
}

/// 好友描述
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuddyFixture {
    #[serde(flatten)]
    pub buddy: Buddy,
    /// 头像文件
    #[serde(default)]
    pub avatar: Option<PathBuf>,
    #[serde(default)]
    pub blocked: bool,
}

/// 会话描述
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationFixture {
    pub account_id: String,
    pub name: String,
    #[serde(default = "default_kind")]
    pub kind: ConversationKind,
    #[serde(default)]
    pub focused: bool,
    #[serde(default)]
    pub history: bool,
}

fn default_kind() -> ConversationKind {
    ConversationKind::Im
}

/// 宿主名单文件
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostFixture {
    #[serde(default)]
    pub accounts: Vec<AccountFixture>,
    #[serde(default)]
    pub buddies: Vec<BuddyFixture>,
    #[serde(default)]
    pub conversations: Vec<ConversationFixture>,
    /// 协议图标目录，图标为 `<icon_dir>/<protocol>.png`
    #[serde(default)]
    pub icon_dir: Option<PathBuf>,
}

impl HostFixture {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Cannot read roster {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid roster {}", path.display()))
    }
}

#[derive(Debug, Clone)]
struct ConversationState {
    focused: bool,
    history: bool,
}

#[derive(Debug, Default)]
struct HostState {
    protocols: HashMap<String, String>,
    connections: HashMap<String, ConnectionState>,
    buddies: HashMap<BuddyKey, BuddyFixture>,
    blocked: HashSet<BuddyKey>,
    conversations: HashMap<ConversationHandle, ConversationState>,
    presented: Vec<ConversationHandle>,
}

type Subscribers = Arc<Mutex<HashMap<u64, (Topic, EngineSender)>>>;

/// 内存宿主
pub struct StaticHost {
    state: Mutex<HostState>,
    icon_dir: Option<PathBuf>,
    subscribers: Subscribers,
    next_subscriber: AtomicU64,
}

impl StaticHost {
    pub fn new(fixture: HostFixture) -> Self {
        let mut state = HostState::default();

        for account in fixture.accounts {
            state.protocols.insert(account.id.clone(), account.protocol);
            state.connections.insert(account.id, account.state);
        }
        for buddy in fixture.buddies {
            let key = buddy.buddy.key();
            if buddy.blocked {
                state.blocked.insert(key.clone());
            }
            state.buddies.insert(key, buddy);
        }
        for conv in fixture.conversations {
            state.conversations.insert(
                ConversationHandle::new(conv.account_id, conv.name, conv.kind),
                ConversationState {
                    focused: conv.focused,
                    history: conv.history,
                },
            );
        }

        Self {
            state: Mutex::new(state),
            icon_dir: fixture.icon_dir,
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            next_subscriber: AtomicU64::new(1),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::new(HostFixture::load(path)?))
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut HostState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    /// 添加账号
    pub fn add_account(&self, account_id: &str, protocol: &str, state: ConnectionState) {
        self.with_state(|s| {
            s.protocols.insert(account_id.to_string(), protocol.to_string());
            s.connections.insert(account_id.to_string(), state);
        });
    }

    /// 添加好友
    pub fn add_buddy(&self, buddy: Buddy) {
        self.with_state(|s| {
            s.buddies.insert(
                buddy.key(),
                BuddyFixture {
                    buddy,
                    avatar: None,
                    blocked: false,
                },
            );
        });
    }

    pub fn set_blocked(&self, account_id: &str, contact_id: &str, blocked: bool) {
        let key = BuddyKey::new(account_id, contact_id);
        self.with_state(|s| {
            if blocked {
                s.blocked.insert(key);
            } else {
                s.blocked.remove(&key);
            }
        });
    }

    pub fn set_connection(&self, account_id: &str, state: ConnectionState) {
        self.with_state(|s| {
            s.connections.insert(account_id.to_string(), state);
        });
    }

    /// 设置或新建会话状态
    pub fn set_conversation(&self, conversation: ConversationHandle, focused: bool, history: bool) {
        self.with_state(|s| {
            s.conversations
                .insert(conversation, ConversationState { focused, history });
        });
    }

    /// 被调到前台的会话（按调用顺序）
    pub fn presented(&self) -> Vec<ConversationHandle> {
        self.with_state(|s| s.presented.clone())
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// 把信号分发给订阅了对应主题的引擎，返回送达数量
    pub fn emit(&self, signal: HostSignal) -> usize {
        let topic = signal.topic();
        let targets: Vec<EngineSender> = match self.subscribers.lock() {
            Ok(subs) => subs
                .values()
                .filter(|(t, _)| *t == topic)
                .map(|(_, sender)| sender.clone())
                .collect(),
            Err(_) => return 0,
        };

        let delivered = targets
            .iter()
            .filter(|sender| sender.signal(signal.clone()))
            .count();
        debug!(topic = topic.as_str(), delivered, "Host signal emitted");
        delivered
    }
}

impl HostClient for StaticHost {
    fn find_buddy(&self, account_id: &str, buddy_id: &str) -> Option<Buddy> {
        self.with_state(|s| {
            s.buddies
                .get(&BuddyKey::new(account_id, buddy_id))
                .map(|b| b.buddy.clone())
        })
    }

    fn is_blocked(&self, account_id: &str, contact_id: &str) -> bool {
        self.with_state(|s| s.blocked.contains(&BuddyKey::new(account_id, contact_id)))
    }

    fn find_conversation(
        &self,
        account_id: &str,
        name: &str,
        kind: ConversationKind,
    ) -> Option<ConversationHandle> {
        let handle = ConversationHandle::new(account_id, name, kind);
        self.with_state(|s| s.conversations.contains_key(&handle).then_some(handle))
    }

    fn find_or_create_conversation(&self, account_id: &str, contact_id: &str) -> ConversationHandle {
        let handle = ConversationHandle::new(account_id, contact_id, ConversationKind::Im);
        self.with_state(|s| {
            s.conversations
                .entry(handle.clone())
                .or_insert(ConversationState {
                    focused: false,
                    history: false,
                });
        });
        handle
    }

    fn present_conversation(&self, conversation: &ConversationHandle) {
        self.with_state(|s| {
            for (handle, state) in s.conversations.iter_mut() {
                state.focused = handle == conversation;
            }
            s.presented.push(conversation.clone());
        });
    }

    fn has_focus(&self, conversation: &ConversationHandle) -> bool {
        self.with_state(|s| s.conversations.get(conversation).is_some_and(|c| c.focused))
    }

    fn has_prior_history(&self, conversation: &ConversationHandle) -> bool {
        self.with_state(|s| s.conversations.get(conversation).is_some_and(|c| c.history))
    }

    fn cached_avatar(&self, buddy: &Buddy) -> Option<Arc<[u8]>> {
        let path = self.with_state(|s| s.buddies.get(&buddy.key()).and_then(|b| b.avatar.clone()))?;
        match fs::read(&path) {
            Ok(bytes) if !bytes.is_empty() => Some(Arc::from(bytes)),
            Ok(_) => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot read avatar");
                None
            }
        }
    }

    fn protocol_icon(&self, account_id: &str) -> Option<String> {
        let dir = self.icon_dir.as_ref()?;
        let protocol = self.with_state(|s| s.protocols.get(account_id).cloned())?;
        Some(dir.join(format!("{}.png", protocol)).to_string_lossy().to_string())
    }

    fn connection_state(&self, account_id: &str) -> ConnectionState {
        self.with_state(|s| {
            s.connections
                .get(account_id)
                .copied()
                .unwrap_or(ConnectionState::Disconnected)
        })
    }
}

impl EventSource for StaticHost {
    fn subscribe(&self, topic: Topic, events: EngineSender) -> Subscription {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.insert(id, (topic, events));
        }
        debug!(topic = topic.as_str(), id, "Host subscription added");

        let subscribers = Arc::clone(&self.subscribers);
        Subscription::new(topic, move || {
            if let Ok(mut subs) = subscribers.lock() {
                subs.remove(&id);
            }
        })
    }
}
