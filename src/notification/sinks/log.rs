//! 日志渠道 - dry-run 用，只记录日志不弹窗

use anyhow::Result;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::info;

use crate::notification::sink::{
    NotificationContent, NotificationHandle, NotificationSink, SinkEvent, SinkEventSender,
};

/// 日志渠道
pub struct LogSink {
    next_handle: AtomicU64,
    live: Mutex<HashSet<NotificationHandle>>,
    shown: AtomicU64,
    events: Mutex<Option<SinkEventSender>>,
}

impl LogSink {
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            live: Mutex::new(HashSet::new()),
            shown: AtomicU64::new(0),
            events: Mutex::new(None),
        }
    }

    /// show 调用总数
    pub fn shown_count(&self) -> u64 {
        self.shown.load(Ordering::Relaxed)
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().map(|l| l.len()).unwrap_or(0)
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    fn attach(&self, events: SinkEventSender) {
        if let Ok(mut slot) = self.events.lock() {
            *slot = Some(events);
        }
    }

    fn create(&self, content: &NotificationContent) -> Result<NotificationHandle> {
        let handle = NotificationHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut live) = self.live.lock() {
            live.insert(handle);
        }
        info!(
            handle = %handle,
            title = %content.title,
            body = %content.body,
            icon = ?content.icon,
            "[DRY-RUN] create"
        );
        Ok(handle)
    }

    fn update(&self, handle: NotificationHandle, title: &str, body: &str) -> Result<()> {
        info!(handle = %handle, title, body, "[DRY-RUN] update");
        Ok(())
    }

    fn show(&self, handle: NotificationHandle) -> Result<()> {
        self.shown.fetch_add(1, Ordering::Relaxed);
        info!(handle = %handle, "[DRY-RUN] show");
        Ok(())
    }

    fn close(&self, handle: NotificationHandle) -> Result<()> {
        let was_live = self.live.lock().map(|mut l| l.remove(&handle)).unwrap_or(false);
        info!(handle = %handle, "[DRY-RUN] close");

        // 与真实守护进程一致：关闭后回报 closed
        if was_live {
            let sender = self.events.lock().ok().and_then(|s| s.clone());
            if let Some(sender) = sender {
                sender.send(SinkEvent::Closed { handle });
            }
        }
        Ok(())
    }

    fn add_action(&self, handle: NotificationHandle, action_id: &str, label: &str) -> Result<()> {
        info!(handle = %handle, action_id, label, "[DRY-RUN] add action");
        Ok(())
    }
}
