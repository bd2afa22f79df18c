//! 通知守护进程（sink）抽象

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::engine::{EngineInput, EngineSender};

/// sink 侧通知句柄（不透明 ID）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NotificationHandle(pub u64);

impl fmt::Display for NotificationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 通知图标
#[derive(Clone, PartialEq, Eq)]
pub enum Icon {
    /// 联系人头像原始字节
    Image(Arc<[u8]>),
    /// 图标文件路径或主题图标名
    Named(String),
}

impl fmt::Debug for Icon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Icon::Image(bytes) => write!(f, "Image({} bytes)", bytes.len()),
            Icon::Named(name) => write!(f, "Named({})", name),
        }
    }
}

/// 提交给 sink 的通知内容
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationContent {
    pub title: String,
    /// 已清洗（截断 + 转义）的正文
    pub body: String,
    pub icon: Option<Icon>,
}

/// sink 回调事件
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    /// 用户点击了通知上的动作
    ActionInvoked {
        handle: NotificationHandle,
        action_id: String,
    },
    /// 通知被关闭（超时、用户关闭或被程序关闭）
    Closed { handle: NotificationHandle },
}

/// sink 回调通道，事件进入引擎的统一输入流
#[derive(Clone)]
pub struct SinkEventSender {
    inner: EngineSender,
}

impl SinkEventSender {
    pub fn new(inner: EngineSender) -> Self {
        Self { inner }
    }

    /// 引擎已停止时返回 false，事件被丢弃
    pub fn send(&self, event: SinkEvent) -> bool {
        self.inner.send(EngineInput::Sink(event))
    }
}

/// 通知 sink trait
///
/// 调用方视所有操作为非阻塞；失败只影响当前弹窗。
pub trait NotificationSink: Send + Sync {
    /// sink 名称（用于日志）
    fn name(&self) -> &str;

    /// 接收回调通道
    fn attach(&self, _events: SinkEventSender) {}

    /// 创建通知（尚未显示）
    fn create(&self, content: &NotificationContent) -> Result<NotificationHandle>;

    /// 替换标题和正文
    fn update(&self, handle: NotificationHandle, title: &str, body: &str) -> Result<()>;

    /// 显示或重新显示
    fn show(&self, handle: NotificationHandle) -> Result<()>;

    /// 关闭并释放句柄
    fn close(&self, handle: NotificationHandle) -> Result<()>;

    /// 添加用户动作，点击后以 `SinkEvent::ActionInvoked` 回调
    fn add_action(&self, handle: NotificationHandle, action_id: &str, label: &str) -> Result<()>;
}
