//! 通知配置 - 从 JSON 文件加载，缺失或损坏时回退默认值

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// 通知策略配置
///
/// 评估时只读；运行期变更通过 `EngineInput::ConfigChanged` 下发。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// 新消息通知
    pub notify_new_message: bool,
    /// 仅对新会话（无历史记录）通知
    pub new_conversations_only: bool,
    /// 被屏蔽联系人也通知
    pub notify_blocked_users: bool,
    /// 好友上线通知
    pub notify_sign_on: bool,
    /// 好友下线通知
    pub notify_sign_off: bool,
    /// 正文最大字符数（按 Unicode 码点计）
    pub body_char_budget: usize,
    /// 联系人名最大字符数
    pub name_char_budget: usize,
    /// 账号登录后的上线通知抑制窗口（毫秒）
    pub suppression_window_ms: u64,
    /// 抑制期间轮询连接状态的间隔（毫秒）
    pub settle_poll_ms: u64,
    /// 传给通知守护进程的应用名
    pub app_name: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            notify_new_message: true,
            new_conversations_only: false,
            notify_blocked_users: false,
            notify_sign_on: true,
            notify_sign_off: false,
            body_char_budget: 60,
            name_char_budget: 25,
            suppression_window_ms: 5000,
            settle_poll_ms: 500,
            app_name: "buddy-notify".to_string(),
        }
    }
}

impl NotifyConfig {
    /// 默认配置文件路径
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("buddy-notify")
            .join("config.json")
    }

    /// 从默认路径加载
    pub fn load() -> Self {
        Self::load_from(&Self::path())
    }

    /// 从指定路径加载；文件不存在或解析失败都返回默认值
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            debug!(path = %path.display(), "Config file not found, using defaults");
            return Self::default();
        }

        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot read config, using defaults");
                return Self::default();
            }
        };

        match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Invalid config, using defaults");
                Self::default()
            }
        }
    }

    pub fn suppression_window(&self) -> Duration {
        Duration::from_millis(self.suppression_window_ms)
    }

    pub fn settle_poll_interval(&self) -> Duration {
        // 0 会让 tokio interval panic
        Duration::from_millis(self.settle_poll_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = NotifyConfig::default();
        assert!(config.notify_new_message);
        assert!(config.notify_sign_on);
        assert!(!config.notify_sign_off);
        assert_eq!(config.body_char_budget, 60);
        assert_eq!(config.name_char_budget, 25);
        assert_eq!(config.suppression_window(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, r#"{{"notify_sign_off": true, "body_char_budget": 40}}"#).unwrap();

        let config = NotifyConfig::load_from(&path);
        assert!(config.notify_sign_off);
        assert_eq!(config.body_char_budget, 40);
        assert_eq!(config.name_char_budget, 25);
        assert!(config.notify_new_message);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = NotifyConfig::load_from(&dir.path().join("nope.json"));
        assert_eq!(config, NotifyConfig::default());
    }

    #[test]
    fn test_invalid_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(NotifyConfig::load_from(&path), NotifyConfig::default());
    }

    #[test]
    fn test_zero_poll_interval_is_clamped() {
        let config = NotifyConfig {
            settle_poll_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.settle_poll_interval(), Duration::from_millis(1));
    }
}
