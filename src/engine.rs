//! 通知引擎 - 单一输入流驱动的事件处理循环
//!
//! 宿主信号、sink 回调、抑制窗口轮询结果、配置变更都经同一个 mpsc 通道进入，
//! 逐条处理，组件内部无需加锁。两张可变表（抑制窗口、合并存储）归引擎独占。

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::NotifyConfig;
use crate::event::{ConversationKind, DomainEvent};
use crate::host::{ChatRoom, EventSource, HostClient, HostSignal, Subscription, Topic};
use crate::notification::classifier::{classify, Decision};
use crate::notification::dispatcher::{PresentOutcome, PresentationDispatcher};
use crate::notification::sink::{NotificationSink, SinkEvent, SinkEventSender};
use crate::notification::store::CoalescingStore;
use crate::notification::suppressor::{spawn_settle_watch, SettleReason, SignOnSuppressor};

/// 引擎输入
#[derive(Debug, Clone)]
pub enum EngineInput {
    /// 宿主信号
    Host(HostSignal),
    /// sink 回调
    Sink(SinkEvent),
    /// 抑制窗口轮询结束
    AccountSettled {
        account_id: String,
        generation: u64,
        reason: SettleReason,
    },
    /// 外部设置变更
    ConfigChanged(NotifyConfig),
}

/// 引擎输入通道的发送端
#[derive(Debug, Clone)]
pub struct EngineSender {
    tx: mpsc::UnboundedSender<EngineInput>,
}

impl EngineSender {
    /// 引擎已停止时返回 false
    pub fn send(&self, input: EngineInput) -> bool {
        self.tx.send(input).is_ok()
    }

    pub fn signal(&self, signal: HostSignal) -> bool {
        self.send(EngineInput::Host(signal))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// 通知引擎
pub struct Engine {
    config: NotifyConfig,
    host: Arc<dyn HostClient>,
    dispatcher: PresentationDispatcher,
    store: CoalescingStore,
    suppressor: SignOnSuppressor,
    tx: EngineSender,
    rx: mpsc::UnboundedReceiver<EngineInput>,
    subscriptions: Vec<Subscription>,
    stopped: bool,
}

impl Engine {
    pub fn new(config: NotifyConfig, host: Arc<dyn HostClient>, sink: Arc<dyn NotificationSink>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let tx = EngineSender { tx };
        sink.attach(SinkEventSender::new(tx.clone()));

        Self {
            suppressor: SignOnSuppressor::new(config.suppression_window()),
            config,
            host,
            dispatcher: PresentationDispatcher::new(sink),
            store: CoalescingStore::new(),
            tx,
            rx,
            subscriptions: Vec::new(),
            stopped: false,
        }
    }

    pub fn sender(&self) -> EngineSender {
        self.tx.clone()
    }

    pub fn config(&self) -> &NotifyConfig {
        &self.config
    }

    pub fn store(&self) -> &CoalescingStore {
        &self.store
    }

    pub fn suppressor(&self) -> &SignOnSuppressor {
        &self.suppressor
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// 订阅宿主的全部信号主题，凭据保存到 shutdown
    pub fn attach(&mut self, source: &dyn EventSource) {
        for topic in Topic::ALL {
            self.subscriptions.push(source.subscribe(topic, self.sender()));
        }
        info!(
            sink = self.dispatcher.sink_name(),
            topics = self.subscriptions.len(),
            "Notification engine attached to host"
        );
    }

    /// 事件循环，直到 token 被取消
    ///
    /// 已排队的输入优先于取消处理，退出前执行 `shutdown`。
    pub async fn run(&mut self, cancel: CancellationToken) {
        info!("Notification engine started");
        loop {
            tokio::select! {
                biased;
                input = self.rx.recv() => match input {
                    Some(input) => self.handle(input),
                    None => break,
                },
                _ = cancel.cancelled() => break,
            }
        }
        self.shutdown();
    }

    /// 处理所有已排队的输入（不等待），返回处理数量
    pub fn process_pending(&mut self) -> usize {
        let mut count = 0;
        while let Ok(input) = self.rx.try_recv() {
            self.handle(input);
            count += 1;
        }
        count
    }

    /// 处理单条输入
    pub fn handle(&mut self, input: EngineInput) {
        if self.stopped {
            debug!(?input, "Engine stopped, input ignored");
            return;
        }

        match input {
            EngineInput::Host(signal) => {
                self.handle_signal(signal);
            }
            EngineInput::Sink(SinkEvent::ActionInvoked { handle, action_id }) => {
                self.dispatcher
                    .on_action(handle, &action_id, &mut self.store, self.host.as_ref());
            }
            EngineInput::Sink(SinkEvent::Closed { handle }) => {
                self.dispatcher.on_closed(handle, &mut self.store);
            }
            EngineInput::AccountSettled {
                account_id,
                generation,
                reason,
            } => {
                if self.suppressor.settle(&account_id, generation) {
                    info!(account_id = %account_id, reason = reason.as_str(), "Sign-on suppression ended");
                }
            }
            EngineInput::ConfigChanged(config) => self.apply_config(config),
        }
    }

    /// 处理宿主信号，返回展示结果（被抑制或无需展示时为 None）
    pub fn handle_signal(&mut self, signal: HostSignal) -> Option<PresentOutcome> {
        match signal {
            HostSignal::BuddySignedOn {
                account_id,
                buddy_id,
            } => self.on_sign_on(&account_id, &buddy_id),
            HostSignal::BuddySignedOff {
                account_id,
                buddy_id,
            } => self.on_sign_off(&account_id, &buddy_id),
            HostSignal::AccountConnected { account_id } => {
                self.on_connected(&account_id);
                None
            }
            HostSignal::MessageReceived {
                account_id,
                sender_id,
                raw_body,
                conversation_kind,
                flags,
            } => self.on_message_received(&account_id, &sender_id, &raw_body, conversation_kind, flags),
            HostSignal::ChatMessageReceived {
                account_id,
                sender_id,
                raw_body,
                chat,
            } => self.on_chat_message_received(&account_id, &sender_id, &raw_body, &chat),
        }
    }

    pub fn on_sign_on(&mut self, account_id: &str, buddy_id: &str) -> Option<PresentOutcome> {
        self.process(DomainEvent::SignOn {
            account_id: account_id.to_string(),
            buddy_id: buddy_id.to_string(),
        })
    }

    pub fn on_sign_off(&mut self, account_id: &str, buddy_id: &str) -> Option<PresentOutcome> {
        self.process(DomainEvent::SignOff {
            account_id: account_id.to_string(),
            buddy_id: buddy_id.to_string(),
        })
    }

    /// 账号连接信号：开启上线抑制窗口并启动轮询
    ///
    /// 没有 tokio 运行时时不启动轮询，窗口按期限自然失效。
    pub fn on_connected(&mut self, account_id: &str) {
        if self.stopped {
            return;
        }
        let ticket = self.suppressor.begin(account_id);

        if tokio::runtime::Handle::try_current().is_ok() {
            spawn_settle_watch(
                ticket,
                self.config.settle_poll_interval(),
                Arc::clone(&self.host),
                self.sender(),
            );
        } else {
            debug!(account_id = %account_id, "No runtime, suppression expires by deadline only");
        }
    }

    pub fn on_message_received(
        &mut self,
        account_id: &str,
        sender_id: &str,
        raw_body: &str,
        kind: ConversationKind,
        flags: u32,
    ) -> Option<PresentOutcome> {
        debug!(account_id = %account_id, sender_id = %sender_id, flags, "Message received");
        let (has_focus, is_new_conversation) = self.conversation_state(account_id, sender_id, kind);
        self.process(DomainEvent::MessageReceived {
            account_id: account_id.to_string(),
            sender_id: sender_id.to_string(),
            raw_body: raw_body.to_string(),
            conversation_kind: kind,
            has_focus,
            is_new_conversation,
        })
    }

    /// 聊天室消息：忽略自己发出的回显，只在提到自己昵称时通知
    pub fn on_chat_message_received(
        &mut self,
        account_id: &str,
        sender_id: &str,
        raw_body: &str,
        chat: &ChatRoom,
    ) -> Option<PresentOutcome> {
        let Some(nick) = chat.own_nick.as_deref().filter(|n| !n.is_empty()) else {
            debug!(chat = %chat.name, "Chat without own nick, message ignored");
            return None;
        };
        if sender_id == nick {
            debug!(chat = %chat.name, "Own chat message echo ignored");
            return None;
        }
        if !self.host.strip_markup(raw_body).contains(nick) {
            debug!(chat = %chat.name, sender_id = %sender_id, "Chat message does not mention nick");
            return None;
        }

        let (has_focus, is_new_conversation) =
            self.conversation_state(account_id, &chat.name, ConversationKind::Chat);
        self.process(DomainEvent::MessageReceived {
            account_id: account_id.to_string(),
            sender_id: sender_id.to_string(),
            raw_body: raw_body.to_string(),
            conversation_kind: ConversationKind::Chat,
            has_focus,
            is_new_conversation,
        })
    }

    /// (会话是否有焦点, 是否为新会话)
    fn conversation_state(&self, account_id: &str, name: &str, kind: ConversationKind) -> (bool, bool) {
        match self.host.find_conversation(account_id, name, kind) {
            Some(conv) => (self.host.has_focus(&conv), !self.host.has_prior_history(&conv)),
            None => (false, true),
        }
    }

    fn process(&mut self, event: DomainEvent) -> Option<PresentOutcome> {
        if self.stopped {
            return None;
        }
        for account_id in self.suppressor.prune_expired() {
            info!(account_id = %account_id, reason = SettleReason::Timeout.as_str(), "Sign-on suppression ended");
        }

        match classify(&event, &self.config, &self.suppressor, self.host.as_ref()) {
            Decision::Suppressed(reason) => {
                debug!(
                    kind = %event.kind(),
                    key = %event.buddy_key(),
                    reason = %reason,
                    "Notification suppressed"
                );
                None
            }
            Decision::Notify(intent) => {
                Some(self.dispatcher.present(&intent, &mut self.store, self.host.as_ref()))
            }
        }
    }

    fn apply_config(&mut self, config: NotifyConfig) {
        self.suppressor.set_window(config.suppression_window());
        info!(?config, "Notification config updated");
        self.config = config;
    }

    /// 停止引擎：退订宿主信号、取消所有轮询、关闭所有弹窗
    ///
    /// 之后到达的任何输入（包括 sink 回调）都被忽略。重复调用是无操作。
    pub fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        let subscriptions = self.subscriptions.len();
        self.subscriptions.clear();
        self.rx.close();
        self.suppressor.cancel_all();
        let closed = self.dispatcher.close_all(&mut self.store);

        info!(subscriptions, closed, "Notification engine stopped");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
