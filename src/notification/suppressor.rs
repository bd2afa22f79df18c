//! 登录洪峰抑制 - 账号刚连上时宿主会重放整个好友列表的上线事件
//!
//! 账号收到连接信号后进入抑制窗口（Connecting），期间该账号的上线事件全部丢弃。
//! 以下任一情况转为 Settled 并移出窗口：
//! - 轮询发现账号已完全连接或已无连接
//! - 窗口超时（有的协议永远不会给出"完全连接"信号）
//!
//! 每个条目持有独立的 `CancellationToken`（根 token 的子 token），
//! 关闭引擎时取消根 token 即可终止所有轮询任务。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::engine::{EngineInput, EngineSender};
use crate::event::AccountId;
use crate::host::{ConnectionState, HostClient};

/// 账号所处阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountPhase {
    /// 在抑制窗口内
    Connecting,
    /// 已离开（或从未进入）抑制窗口
    Settled,
}

/// 离开抑制窗口的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleReason {
    /// 账号已完全连接
    Connected,
    /// 账号已没有连接（登录中止）
    Disconnected,
    /// 窗口超时
    Timeout,
}

impl SettleReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettleReason::Connected => "connected",
            SettleReason::Disconnected => "disconnected",
            SettleReason::Timeout => "timeout",
        }
    }
}

#[derive(Debug)]
struct SuppressionEntry {
    generation: u64,
    deadline: Instant,
    cancel: CancellationToken,
}

/// 新条目的轮询凭据
#[derive(Debug, Clone)]
pub struct SettleTicket {
    pub account_id: AccountId,
    pub generation: u64,
    pub deadline: Instant,
    pub cancel: CancellationToken,
}

/// 登录洪峰抑制器（持有 SuppressionWindow）
#[derive(Debug)]
pub struct SignOnSuppressor {
    window: Duration,
    entries: HashMap<AccountId, SuppressionEntry>,
    root: CancellationToken,
    next_generation: u64,
}

impl SignOnSuppressor {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: HashMap::new(),
            root: CancellationToken::new(),
            next_generation: 0,
        }
    }

    /// 修改窗口时长（只影响之后开始的窗口）
    pub fn set_window(&mut self, window: Duration) {
        self.window = window;
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// 账号连接信号：进入抑制窗口
    ///
    /// 已在窗口内的账号会重新计时，旧的轮询任务被取消。
    pub fn begin(&mut self, account_id: &str) -> SettleTicket {
        self.begin_at(account_id, Instant::now())
    }

    pub fn begin_at(&mut self, account_id: &str, now: Instant) -> SettleTicket {
        if self.root.is_cancelled() {
            self.root = CancellationToken::new();
        }
        self.next_generation += 1;
        let generation = self.next_generation;
        let deadline = now + self.window;
        let cancel = self.root.child_token();

        if let Some(old) = self.entries.insert(
            account_id.to_string(),
            SuppressionEntry {
                generation,
                deadline,
                cancel: cancel.clone(),
            },
        ) {
            old.cancel.cancel();
        }

        debug!(account_id = %account_id, generation, "Sign-on suppression started");

        SettleTicket {
            account_id: account_id.to_string(),
            generation,
            deadline,
            cancel,
        }
    }

    /// 账号当前是否在抑制窗口内
    pub fn is_suppressed(&self, account_id: &str) -> bool {
        self.is_suppressed_at(account_id, Instant::now())
    }

    /// 超过期限的条目即使尚未被清理也视为已离开窗口
    pub fn is_suppressed_at(&self, account_id: &str, now: Instant) -> bool {
        self.entries
            .get(account_id)
            .is_some_and(|entry| now < entry.deadline)
    }

    pub fn phase(&self, account_id: &str) -> AccountPhase {
        if self.is_suppressed(account_id) {
            AccountPhase::Connecting
        } else {
            AccountPhase::Settled
        }
    }

    /// 轮询任务报告离开窗口
    ///
    /// 只有代次匹配才移除，被重新计时覆盖的旧任务报告被忽略。
    pub fn settle(&mut self, account_id: &str, generation: u64) -> bool {
        match self.entries.get(account_id) {
            Some(entry) if entry.generation == generation => {
                if let Some(entry) = self.entries.remove(account_id) {
                    entry.cancel.cancel();
                }
                true
            }
            _ => false,
        }
    }

    /// 清理所有超过期限的条目，返回被清理的账号
    pub fn prune_expired(&mut self) -> Vec<AccountId> {
        self.prune_expired_at(Instant::now())
    }

    pub fn prune_expired_at(&mut self, now: Instant) -> Vec<AccountId> {
        let expired: Vec<AccountId> = self
            .entries
            .iter()
            .filter(|(_, entry)| now >= entry.deadline)
            .map(|(account, _)| account.clone())
            .collect();

        for account in &expired {
            if let Some(entry) = self.entries.remove(account) {
                entry.cancel.cancel();
            }
        }
        expired
    }

    /// 取消所有轮询任务并清空窗口
    pub fn cancel_all(&mut self) {
        self.root.cancel();
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, account_id: &str) -> bool {
        self.entries.contains_key(account_id)
    }
}

/// 启动轮询任务：每隔 `poll_interval` 检查一次连接状态，到期强制结束
///
/// 结果以 `EngineInput::AccountSettled` 投回引擎；引擎已停止时发送失败被忽略。
/// token 被取消时任务直接退出，不发送任何消息。
pub fn spawn_settle_watch(
    ticket: SettleTicket,
    poll_interval: Duration,
    host: Arc<dyn HostClient>,
    events: EngineSender,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let SettleTicket {
            account_id,
            generation,
            deadline,
            cancel,
        } = ticket;

        let mut ticker = tokio::time::interval_at(Instant::now() + poll_interval, poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let reason = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(account_id = %account_id, generation, "Settle watch cancelled");
                    return;
                }
                _ = tokio::time::sleep_until(deadline) => break SettleReason::Timeout,
                _ = ticker.tick() => {
                    match host.connection_state(&account_id) {
                        ConnectionState::Connecting => continue,
                        ConnectionState::Connected => break SettleReason::Connected,
                        ConnectionState::Disconnected => break SettleReason::Disconnected,
                    }
                }
            }
        };

        if cancel.is_cancelled() {
            return;
        }

        events.send(EngineInput::AccountSettled {
            account_id,
            generation,
            reason,
        });
    })
}
