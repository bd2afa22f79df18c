//! 展示分发器 - 组装通知、提交 sink、处理 sink 回调

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::classifier::NotifyIntent;
use super::sink::{Icon, NotificationContent, NotificationHandle, NotificationSink};
use super::store::{CoalescingStore, Upsert};
use crate::event::Buddy;
use crate::host::HostClient;

/// "显示会话"动作 ID
pub const SHOW_ACTION: &str = "show";
const SHOW_LABEL: &str = "Show";

/// 展示结果
#[derive(Debug, Clone, PartialEq)]
pub enum PresentOutcome {
    /// 新建弹窗
    Created(NotificationHandle),
    /// 更新已有弹窗
    Updated(NotificationHandle),
    /// sink 拒绝，已记录日志
    Failed(String),
}

/// 展示分发器
pub struct PresentationDispatcher {
    sink: Arc<dyn NotificationSink>,
}

impl PresentationDispatcher {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink }
    }

    pub fn sink_name(&self) -> &str {
        self.sink.name()
    }

    /// 选择图标：联系人头像 > 协议默认图标 > 无图标
    pub fn resolve_icon(host: &dyn HostClient, buddy: &Buddy) -> Option<Icon> {
        if let Some(avatar) = host.cached_avatar(buddy) {
            return Some(Icon::Image(avatar));
        }
        host.protocol_icon(&buddy.account_id).map(Icon::Named)
    }

    /// 展示通知：同一联系人已有存活弹窗则更新，否则新建
    ///
    /// sink 失败只记录日志，不向调用方传播。
    pub fn present(
        &self,
        intent: &NotifyIntent,
        store: &mut CoalescingStore,
        host: &dyn HostClient,
    ) -> PresentOutcome {
        let sink = &self.sink;
        let upsert = store.upsert_with(&intent.key, &intent.title, &intent.body, || {
            let content = NotificationContent {
                title: intent.title.clone(),
                body: intent.body.clone(),
                icon: Self::resolve_icon(host, &intent.buddy),
            };
            let handle = sink.create(&content)?;
            if let Err(e) = sink.add_action(handle, SHOW_ACTION, SHOW_LABEL) {
                warn!(handle = %handle, error = %e, "Failed to add notification action");
            }
            Ok(handle)
        });

        let upsert = match upsert {
            Ok(u) => u,
            Err(e) => {
                error!(sink = sink.name(), key = %intent.key, error = %e, "Failed to create notification");
                return PresentOutcome::Failed(e.to_string());
            }
        };

        let handle = upsert.handle();
        if let Upsert::Updated(_) = upsert {
            if let Err(e) = sink.update(handle, &intent.title, &intent.body) {
                return self.abandon(store, handle, "update", e);
            }
        }

        if let Err(e) = sink.show(handle) {
            return self.abandon(store, handle, "show", e);
        }

        debug!(
            sink = sink.name(),
            key = %intent.key,
            handle = %handle,
            kind = %intent.kind,
            created = upsert.is_new(),
            "Notification shown"
        );

        match upsert {
            Upsert::Created(h) => PresentOutcome::Created(h),
            Upsert::Updated(h) => PresentOutcome::Updated(h),
        }
    }

    /// 显示失败的弹窗不会再有关闭回调，立即移除避免之后一直"更新"看不见的通知
    fn abandon(
        &self,
        store: &mut CoalescingStore,
        handle: NotificationHandle,
        op: &str,
        e: anyhow::Error,
    ) -> PresentOutcome {
        error!(sink = self.sink.name(), handle = %handle, op, error = %e, "Failed to send notification");
        store.remove_by_handle(handle);
        if let Err(e) = self.sink.close(handle) {
            debug!(handle = %handle, error = %e, "Close after failure also failed");
        }
        PresentOutcome::Failed(e.to_string())
    }

    /// 用户点击动作：打开（或新建）与联系人的会话并调到前台，然后关闭弹窗
    pub fn on_action(
        &self,
        handle: NotificationHandle,
        action_id: &str,
        store: &mut CoalescingStore,
        host: &dyn HostClient,
    ) -> bool {
        if action_id != SHOW_ACTION {
            debug!(handle = %handle, action_id, "Ignoring unknown action");
            return false;
        }

        let Some(record) = store.remove_by_handle(handle) else {
            debug!(handle = %handle, "Action for evicted notification ignored");
            return false;
        };

        let conversation =
            host.find_or_create_conversation(&record.key.account_id, &record.key.buddy_id);
        info!(key = %record.key, conversation = %conversation, "Presenting conversation");
        host.present_conversation(&conversation);

        if let Err(e) = self.sink.close(handle) {
            warn!(handle = %handle, error = %e, "Failed to close notification");
        }
        true
    }

    /// sink 报告弹窗关闭：移除记录
    pub fn on_closed(&self, handle: NotificationHandle, store: &mut CoalescingStore) -> bool {
        match store.remove_by_handle(handle) {
            Some(record) => {
                debug!(key = %record.key, handle = %handle, updates = record.updates, "Notification closed");
                true
            }
            None => {
                debug!(handle = %handle, "Close for unknown notification ignored");
                false
            }
        }
    }

    /// 关闭所有存活弹窗并清空存储
    pub fn close_all(&self, store: &mut CoalescingStore) -> usize {
        let records = store.drain();
        for record in &records {
            if let Err(e) = self.sink.close(record.handle) {
                warn!(handle = %record.handle, error = %e, "Failed to close notification");
            }
        }
        records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{BuddyKey, EventKind};
    use crate::host::{ConnectionState, StaticHost};
    use anyhow::Result;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Mutex;

    /// 测试用的 mock sink
    #[derive(Default)]
    struct MockSink {
        next: AtomicU64,
        calls: Mutex<Vec<String>>,
        contents: Mutex<Vec<NotificationContent>>,
        fail_show: AtomicBool,
    }

    impl MockSink {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl NotificationSink for MockSink {
        fn name(&self) -> &str {
            "mock"
        }

        fn create(&self, content: &NotificationContent) -> Result<NotificationHandle> {
            let handle = NotificationHandle(self.next.fetch_add(1, Ordering::SeqCst) + 1);
            self.record(format!("create {}", handle));
            self.contents.lock().unwrap().push(content.clone());
            Ok(handle)
        }

        fn update(&self, handle: NotificationHandle, _title: &str, body: &str) -> Result<()> {
            self.record(format!("update {} {}", handle, body));
            Ok(())
        }

        fn show(&self, handle: NotificationHandle) -> Result<()> {
            self.record(format!("show {}", handle));
            if self.fail_show.load(Ordering::SeqCst) {
                anyhow::bail!("daemon unreachable");
            }
            Ok(())
        }

        fn close(&self, handle: NotificationHandle) -> Result<()> {
            self.record(format!("close {}", handle));
            Ok(())
        }

        fn add_action(&self, handle: NotificationHandle, action_id: &str, _label: &str) -> Result<()> {
            self.record(format!("action {} {}", handle, action_id));
            Ok(())
        }
    }

    fn intent(body: &str) -> NotifyIntent {
        NotifyIntent {
            key: BuddyKey::new("acc", "bob"),
            buddy: Buddy::new("acc", "bob"),
            kind: EventKind::Message,
            title: "bob says:".to_string(),
            body: body.to_string(),
        }
    }

    fn host() -> StaticHost {
        let host = StaticHost::new(Default::default());
        host.add_account("acc", "jabber", ConnectionState::Connected);
        host.add_buddy(Buddy::new("acc", "bob"));
        host
    }

    #[test]
    fn test_present_creates_then_updates() {
        let sink = Arc::new(MockSink::default());
        let dispatcher = PresentationDispatcher::new(sink.clone());
        let mut store = CoalescingStore::new();
        let host = host();

        let first = dispatcher.present(&intent("one"), &mut store, &host);
        let second = dispatcher.present(&intent("two"), &mut store, &host);

        assert_eq!(first, PresentOutcome::Created(NotificationHandle(1)));
        assert_eq!(second, PresentOutcome::Updated(NotificationHandle(1)));
        assert_eq!(
            sink.calls(),
            vec!["create #1", "action #1 show", "show #1", "update #1 two", "show #1"]
        );
    }

    #[test]
    fn test_show_failure_is_swallowed_and_evicted() {
        let sink = Arc::new(MockSink::default());
        sink.fail_show.store(true, Ordering::SeqCst);
        let dispatcher = PresentationDispatcher::new(sink.clone());
        let mut store = CoalescingStore::new();

        let outcome = dispatcher.present(&intent("hi"), &mut store, &host());
        assert!(matches!(outcome, PresentOutcome::Failed(_)));
        assert!(store.is_empty());
        assert!(sink.calls().contains(&"close #1".to_string()));
    }

    #[test]
    fn test_icon_falls_back_to_none() {
        let sink = Arc::new(MockSink::default());
        let dispatcher = PresentationDispatcher::new(sink.clone());
        let mut store = CoalescingStore::new();

        dispatcher.present(&intent("hi"), &mut store, &host());
        assert_eq!(sink.contents.lock().unwrap()[0].icon, None);
    }

    #[test]
    fn test_icon_uses_protocol_default() {
        let host = StaticHost::new(crate::host::HostFixture {
            icon_dir: Some("/icons".into()),
            ..Default::default()
        });
        host.add_account("acc", "irc", ConnectionState::Connected);
        let icon = PresentationDispatcher::resolve_icon(&host, &Buddy::new("acc", "bob"));
        assert_eq!(icon, Some(Icon::Named("/icons/irc.png".to_string())));
    }

    #[test]
    fn test_action_presents_conversation_and_closes() {
        let sink = Arc::new(MockSink::default());
        let dispatcher = PresentationDispatcher::new(sink.clone());
        let mut store = CoalescingStore::new();
        let host = host();

        dispatcher.present(&intent("hi"), &mut store, &host);
        assert!(dispatcher.on_action(NotificationHandle(1), SHOW_ACTION, &mut store, &host));

        assert!(store.is_empty());
        assert_eq!(host.presented().len(), 1);
        assert_eq!(host.presented()[0].name, "bob");
        assert!(sink.calls().contains(&"close #1".to_string()));

        // 之后到达的关闭回调是无操作
        assert!(!dispatcher.on_closed(NotificationHandle(1), &mut store));
        assert!(!dispatcher.on_action(NotificationHandle(1), SHOW_ACTION, &mut store, &host));
    }

    #[test]
    fn test_close_all() {
        let sink = Arc::new(MockSink::default());
        let dispatcher = PresentationDispatcher::new(sink.clone());
        let mut store = CoalescingStore::new();
        let host = host();
        host.add_buddy(Buddy::new("acc", "carol"));

        dispatcher.present(&intent("hi"), &mut store, &host);
        let mut other = intent("yo");
        other.key = BuddyKey::new("acc", "carol");
        other.buddy = Buddy::new("acc", "carol");
        dispatcher.present(&other, &mut store, &host);

        assert_eq!(dispatcher.close_all(&mut store), 2);
        assert!(store.is_empty());
        let calls = sink.calls();
        assert!(calls.contains(&"close #1".to_string()));
        assert!(calls.contains(&"close #2".to_string()));
    }
}
