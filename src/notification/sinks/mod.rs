//! 具体 sink 实现

pub mod log;
pub mod notify_send;

pub use log::LogSink;
pub use notify_send::{NotifySendConfig, NotifySendSink};
