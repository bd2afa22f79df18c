//! 集成测试共用的 mock sink 与宿主

#![allow(dead_code)]

use anyhow::Result;
use buddy_notify::notification::{Icon, NotificationContent, SinkEventSender};
use buddy_notify::{
    Buddy, ConnectionState, Engine, NotificationHandle, NotificationSink, NotifyConfig, SinkEvent,
    StaticHost,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub const ACCOUNT: &str = "me@jabber.org";

/// sink 调用记录
#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    Create {
        handle: NotificationHandle,
        title: String,
        body: String,
        icon: Option<Icon>,
    },
    Update {
        handle: NotificationHandle,
        title: String,
        body: String,
    },
    Show(NotificationHandle),
    Close(NotificationHandle),
    AddAction(NotificationHandle, String),
}

/// 记录所有调用的 sink，可模拟守护进程回调
#[derive(Default)]
pub struct RecordingSink {
    next: AtomicU64,
    calls: Mutex<Vec<SinkCall>>,
    events: Mutex<Option<SinkEventSender>>,
    pub fail_show: AtomicBool,
}

impl RecordingSink {
    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn creates(&self) -> Vec<SinkCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, SinkCall::Create { .. }))
            .collect()
    }

    pub fn updates(&self) -> Vec<SinkCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, SinkCall::Update { .. }))
            .collect()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// 模拟守护进程报告弹窗关闭
    pub fn report_closed(&self, handle: NotificationHandle) -> bool {
        self.send(SinkEvent::Closed { handle })
    }

    /// 模拟用户点击动作
    pub fn report_action(&self, handle: NotificationHandle, action_id: &str) -> bool {
        self.send(SinkEvent::ActionInvoked {
            handle,
            action_id: action_id.to_string(),
        })
    }

    fn send(&self, event: SinkEvent) -> bool {
        match self.events.lock().unwrap().as_ref() {
            Some(sender) => sender.send(event),
            None => false,
        }
    }

    fn record(&self, call: SinkCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl NotificationSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    fn attach(&self, events: SinkEventSender) {
        *self.events.lock().unwrap() = Some(events);
    }

    fn create(&self, content: &NotificationContent) -> Result<NotificationHandle> {
        let handle = NotificationHandle(self.next.fetch_add(1, Ordering::SeqCst) + 1);
        self.record(SinkCall::Create {
            handle,
            title: content.title.clone(),
            body: content.body.clone(),
            icon: content.icon.clone(),
        });
        Ok(handle)
    }

    fn update(&self, handle: NotificationHandle, title: &str, body: &str) -> Result<()> {
        self.record(SinkCall::Update {
            handle,
            title: title.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }

    fn show(&self, handle: NotificationHandle) -> Result<()> {
        self.record(SinkCall::Show(handle));
        if self.fail_show.load(Ordering::SeqCst) {
            anyhow::bail!("notification daemon unreachable");
        }
        Ok(())
    }

    fn close(&self, handle: NotificationHandle) -> Result<()> {
        self.record(SinkCall::Close(handle));
        Ok(())
    }

    fn add_action(&self, handle: NotificationHandle, action_id: &str, _label: &str) -> Result<()> {
        self.record(SinkCall::AddAction(handle, action_id.to_string()));
        Ok(())
    }
}

/// 带 alice、bob 两个好友的宿主
pub fn host() -> Arc<StaticHost> {
    let host = Arc::new(StaticHost::new(Default::default()));
    host.add_account(ACCOUNT, "jabber", ConnectionState::Connected);
    host.add_buddy(Buddy::new(ACCOUNT, "alice"));
    host.add_buddy(Buddy::new(ACCOUNT, "bob"));
    host
}

pub fn setup(config: NotifyConfig) -> (Engine, Arc<StaticHost>, Arc<RecordingSink>) {
    let host = host();
    let sink = Arc::new(RecordingSink::default());
    let mut engine = Engine::new(config, host.clone(), sink.clone());
    engine.attach(host.as_ref());
    (engine, host, sink)
}
