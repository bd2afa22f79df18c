//! notify-send 渠道 - 通过 `notify-send` 命令驱动桌面通知守护进程
//!
//! - `--print-id` 取得守护进程分配的 ID，之后的更新用 `--replace-id` 原地替换
//! - `--wait` 让进程阻塞到弹窗关闭，期间点击动作会把动作名打印到 stdout
//! - 主动关闭通过 `gdbus` 调用 `CloseNotification`
//!
//! show 同步读取 `--print-id` 输出的 ID 后才返回，紧接着的更新一定能带上
//! `--replace-id`。每次 show 都有新的代次，只有最新代次的进程退出才会上报关闭。

use anyhow::{anyhow, Context, Result};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fs;
use std::hash::{Hash, Hasher};
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::notification::sink::{
    Icon, NotificationContent, NotificationHandle, NotificationSink, SinkEvent, SinkEventSender,
};

/// notify-send 渠道配置
#[derive(Debug, Clone)]
pub struct NotifySendConfig {
    /// notify-send 命令路径
    pub notify_send_cmd: String,
    /// gdbus 命令路径（关闭通知用）
    pub gdbus_cmd: String,
    pub app_name: String,
    /// 过期时间（毫秒），None 使用守护进程默认值
    pub expire_ms: Option<u32>,
    /// 头像缓存目录
    pub icon_cache_dir: PathBuf,
}

impl NotifySendConfig {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            notify_send_cmd: "notify-send".to_string(),
            gdbus_cmd: "gdbus".to_string(),
            app_name: app_name.into(),
            expire_ms: None,
            icon_cache_dir: dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("buddy-notify")
                .join("icons"),
        }
    }
}

struct Entry {
    content: NotificationContent,
    actions: Vec<(String, String)>,
    /// 守护进程分配的 ID
    daemon_id: Option<u32>,
    generation: u64,
    child: Option<Child>,
}

type Entries = Arc<Mutex<HashMap<NotificationHandle, Entry>>>;
type Events = Arc<Mutex<Option<SinkEventSender>>>;

/// notify-send 渠道
pub struct NotifySendSink {
    config: NotifySendConfig,
    entries: Entries,
    events: Events,
    next_handle: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl NotifySendSink {
    pub fn new(config: NotifySendConfig) -> Self {
        Self {
            config,
            entries: Arc::new(Mutex::new(HashMap::new())),
            events: Arc::new(Mutex::new(None)),
            next_handle: AtomicU64::new(1),
        }
    }

    /// 把图标转成 notify-send 参数；头像字节写入缓存文件
    fn icon_arg(&self, icon: &Icon) -> Option<String> {
        match icon {
            Icon::Named(name) => Some(name.clone()),
            Icon::Image(bytes) => {
                let mut hasher = DefaultHasher::new();
                bytes.hash(&mut hasher);
                let path = self
                    .config
                    .icon_cache_dir
                    .join(format!("{:016x}.img", hasher.finish()));

                if !path.exists() {
                    let written = fs::create_dir_all(&self.config.icon_cache_dir)
                        .and_then(|_| fs::write(&path, bytes));
                    if let Err(e) = written {
                        warn!(path = %path.display(), error = %e, "Cannot cache avatar, showing without icon");
                        return None;
                    }
                }
                Some(path.to_string_lossy().to_string())
            }
        }
    }

    fn build_args(&self, entry: &Entry) -> Vec<String> {
        let mut args = vec![
            format!("--app-name={}", self.config.app_name),
            "--urgency=normal".to_string(),
            "--print-id".to_string(),
            "--wait".to_string(),
        ];
        if let Some(id) = entry.daemon_id {
            args.push(format!("--replace-id={}", id));
        }
        if let Some(ms) = self.config.expire_ms {
            args.push(format!("--expire-time={}", ms));
        }
        if let Some(icon) = entry.content.icon.as_ref().and_then(|i| self.icon_arg(i)) {
            args.push(format!("--icon={}", icon));
        }
        for (id, label) in &entry.actions {
            args.push(format!("--action={}={}", id, label));
        }
        args.push("--".to_string());
        args.push(entry.content.title.clone());
        args.push(entry.content.body.clone());
        args
    }

    fn send_event(events: &Events, event: SinkEvent) {
        let sender = lock(events).clone();
        match sender {
            Some(sender) => {
                if !sender.send(event) {
                    debug!("Engine stopped, sink event dropped");
                }
            }
            None => debug!(?event, "No listener for sink event"),
        }
    }

    /// 读取 `--print-id` 输出的首行
    ///
    /// 首行不是数字（旧版 notify-send）时原样返回，交给 `watch_output` 当作动作处理。
    fn read_daemon_id(reader: &mut BufReader<ChildStdout>) -> (Option<u32>, Option<String>) {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) => (None, None),
            Ok(_) => match line.trim().parse::<u32>() {
                Ok(id) => (Some(id), None),
                Err(_) => (None, Some(line)),
            },
            Err(e) => {
                debug!(error = %e, "Cannot read notification id");
                (None, None)
            }
        }
    }

    /// 读取 notify-send 后续输出：每行是被点击的动作，EOF 表示弹窗关闭
    fn watch_output(
        reader: BufReader<ChildStdout>,
        pending: Option<String>,
        handle: NotificationHandle,
        generation: u64,
        entries: Entries,
        events: Events,
    ) {
        let is_current = |entries: &Entries| {
            lock(entries)
                .get(&handle)
                .is_some_and(|e| e.generation == generation)
        };

        let lines = pending.into_iter().chain(reader.lines().map_while(Result::ok));
        for line in lines {
            let line = line.trim();
            if !line.is_empty() && is_current(&entries) {
                Self::send_event(
                    &events,
                    SinkEvent::ActionInvoked {
                        handle,
                        action_id: line.to_string(),
                    },
                );
            }
        }

        let closed = {
            let mut guard = lock(&entries);
            match guard.get_mut(&handle) {
                Some(entry) if entry.generation == generation => {
                    if let Some(mut child) = entry.child.take() {
                        let _ = child.wait();
                    }
                    true
                }
                _ => false,
            }
        };
        if closed {
            Self::send_event(&events, SinkEvent::Closed { handle });
        }
    }

    /// 在后台线程调用 gdbus 关闭弹窗，并回收子进程
    fn close_remote(&self, daemon_id: u32) -> JoinHandle<()> {
        let mut command = Command::new(&self.config.gdbus_cmd);
        command
            .args([
                "call",
                "--session",
                "--dest",
                "org.freedesktop.Notifications",
                "--object-path",
                "/org/freedesktop/Notifications",
                "--method",
                "org.freedesktop.Notifications.CloseNotification",
                &daemon_id.to_string(),
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        std::thread::spawn(move || match command.status() {
            Ok(status) if !status.success() => {
                debug!(daemon_id, %status, "gdbus CloseNotification failed");
            }
            Ok(_) => {}
            Err(e) => debug!(daemon_id, error = %e, "Cannot run gdbus to close notification"),
        })
    }
}

fn reap(mut child: Child) {
    let _ = child.kill();
    let _ = child.wait();
}

impl NotificationSink for NotifySendSink {
    fn name(&self) -> &str {
        "notify-send"
    }

    fn attach(&self, events: SinkEventSender) {
        *lock(&self.events) = Some(events);
    }

    fn create(&self, content: &NotificationContent) -> Result<NotificationHandle> {
        let handle = NotificationHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        lock(&self.entries).insert(
            handle,
            Entry {
                content: content.clone(),
                actions: Vec::new(),
                daemon_id: None,
                generation: 0,
                child: None,
            },
        );
        Ok(handle)
    }

    fn update(&self, handle: NotificationHandle, title: &str, body: &str) -> Result<()> {
        let mut entries = lock(&self.entries);
        let entry = entries
            .get_mut(&handle)
            .ok_or_else(|| anyhow!("unknown notification {}", handle))?;
        entry.content.title = title.to_string();
        entry.content.body = body.to_string();
        Ok(())
    }

    fn show(&self, handle: NotificationHandle) -> Result<()> {
        let (args, generation, previous) = {
            let mut entries = lock(&self.entries);
            let entry = entries
                .get_mut(&handle)
                .ok_or_else(|| anyhow!("unknown notification {}", handle))?;
            entry.generation += 1;
            if entry.generation > 1 && entry.daemon_id.is_none() {
                debug!(handle = %handle, "Daemon id not known yet, update shows a new popup");
            }
            (self.build_args(entry), entry.generation, entry.child.take())
        };

        // 旧进程只在等待关闭，直接结束
        if let Some(child) = previous {
            reap(child);
        }

        let mut child = Command::new(&self.config.notify_send_cmd)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("Cannot spawn {}", self.config.notify_send_cmd))?;
        let Some(stdout) = child.stdout.take() else {
            reap(child);
            return Err(anyhow!("{} has no stdout", self.config.notify_send_cmd));
        };

        // ID 必须在返回前记录，否则紧接着的更新会弹出第二个窗口
        let mut reader = BufReader::new(stdout);
        let (daemon_id, pending) = Self::read_daemon_id(&mut reader);

        {
            let mut entries = lock(&self.entries);
            match entries.get_mut(&handle) {
                Some(entry) if entry.generation == generation => {
                    if daemon_id.is_some() {
                        entry.daemon_id = daemon_id;
                    }
                    entry.child = Some(child);
                }
                _ => reap(child),
            }
        }
        debug!(handle = %handle, generation, ?daemon_id, "Notification process started");

        let entries = Arc::clone(&self.entries);
        let events = Arc::clone(&self.events);
        std::thread::spawn(move || {
            Self::watch_output(reader, pending, handle, generation, entries, events);
        });
        Ok(())
    }

    fn close(&self, handle: NotificationHandle) -> Result<()> {
        let entry = lock(&self.entries).remove(&handle);
        let Some(mut entry) = entry else {
            return Ok(());
        };
        if let Some(child) = entry.child.take() {
            reap(child);
        }
        if let Some(id) = entry.daemon_id {
            // 不等待 gdbus 结束
            let _ = self.close_remote(id);
        }
        Ok(())
    }

    fn add_action(&self, handle: NotificationHandle, action_id: &str, label: &str) -> Result<()> {
        let mut entries = lock(&self.entries);
        let entry = entries
            .get_mut(&handle)
            .ok_or_else(|| anyhow!("unknown notification {}", handle))?;
        entry.actions.push((action_id.to_string(), label.to_string()));
        Ok(())
    }
}

impl Drop for NotifySendSink {
    fn drop(&mut self) {
        for (_, mut entry) in lock(&self.entries).drain() {
            if let Some(child) = entry.child.take() {
                reap(child);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink(dir: &std::path::Path) -> NotifySendSink {
        let mut config = NotifySendConfig::new("buddy-notify");
        config.icon_cache_dir = dir.to_path_buf();
        config.notify_send_cmd = "/nonexistent/notify-send".to_string();
        NotifySendSink::new(config)
    }

    fn content(icon: Option<Icon>) -> NotificationContent {
        NotificationContent {
            title: "bob says:".to_string(),
            body: "hi &amp; bye".to_string(),
            icon,
        }
    }

    #[test]
    fn test_build_args() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink(dir.path());
        let handle = sink
            .create(&content(Some(Icon::Named("/icons/jabber.png".to_string()))))
            .unwrap();
        sink.add_action(handle, "show", "Show").unwrap();

        let entries = lock(&sink.entries);
        let args = sink.build_args(entries.get(&handle).unwrap());
        assert_eq!(
            args,
            vec![
                "--app-name=buddy-notify",
                "--urgency=normal",
                "--print-id",
                "--wait",
                "--icon=/icons/jabber.png",
                "--action=show=Show",
                "--",
                "bob says:",
                "hi &amp; bye",
            ]
        );
    }

    #[test]
    fn test_replace_id_after_first_show() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink(dir.path());
        let handle = sink.create(&content(None)).unwrap();
        lock(&sink.entries).get_mut(&handle).unwrap().daemon_id = Some(42);
        sink.update(handle, "bob says:", "second").unwrap();

        let entries = lock(&sink.entries);
        let args = sink.build_args(entries.get(&handle).unwrap());
        assert!(args.contains(&"--replace-id=42".to_string()));
        assert_eq!(args.last().unwrap(), "second");
    }

    #[test]
    fn test_avatar_written_to_cache() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink(dir.path());
        let icon = Icon::Image(Arc::from(vec![1u8, 2, 3, 4]));

        let path = sink.icon_arg(&icon).unwrap();
        assert!(path.starts_with(&*dir.path().to_string_lossy()));
        assert_eq!(fs::read(&path).unwrap(), vec![1, 2, 3, 4]);
        // 相同内容复用同一文件
        assert_eq!(sink.icon_arg(&icon).unwrap(), path);
    }

    #[test]
    fn test_show_fails_when_command_missing() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink(dir.path());
        let handle = sink.create(&content(None)).unwrap();
        assert!(sink.show(handle).is_err());
    }

    #[test]
    fn test_unknown_handle() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink(dir.path());
        assert!(sink.update(NotificationHandle(9), "t", "b").is_err());
        assert!(sink.show(NotificationHandle(9)).is_err());
        // 关闭未知句柄是无操作
        assert!(sink.close(NotificationHandle(9)).is_ok());
    }

    /// 写一个可执行的假命令脚本
    #[cfg(unix)]
    fn fake_command(dir: &std::path::Path, name: &str, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().to_string()
    }

    /// 并行测试 fork 时可能短暂持有脚本的写句柄（ETXTBSY），重试几次
    #[cfg(unix)]
    fn show_retrying(sink: &NotifySendSink, handle: NotificationHandle) {
        for _ in 0..20 {
            if sink.show(handle).is_ok() {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        panic!("show kept failing");
    }

    #[cfg(unix)]
    #[test]
    fn test_update_right_after_show_replaces_popup() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("calls.log");
        let mut sink = sink(dir.path());
        sink.config.notify_send_cmd = fake_command(
            dir.path(),
            "notify-send",
            &format!(
                "echo \"$*\" >> '{}'\nsleep 0.05\necho 77\nexec sleep 5",
                log.display()
            ),
        );

        let handle = sink.create(&content(None)).unwrap();
        show_retrying(&sink, handle);
        assert_eq!(lock(&sink.entries).get(&handle).unwrap().daemon_id, Some(77));

        sink.update(handle, "bob says:", "two").unwrap();
        show_retrying(&sink, handle);

        let calls = fs::read_to_string(&log).unwrap();
        let lines: Vec<&str> = calls.lines().collect();
        assert_eq!(lines.len(), 2, "calls: {:?}", lines);
        assert!(!lines[0].contains("--replace-id"));
        assert!(lines[1].contains("--replace-id=77"), "second call: {}", lines[1]);
        assert!(lines[1].ends_with("two"));
    }

    #[cfg(unix)]
    #[test]
    fn test_close_remote_runs_and_reaps_gdbus() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("gdbus.log");
        let mut sink = sink(dir.path());
        sink.config.gdbus_cmd = fake_command(
            dir.path(),
            "gdbus",
            &format!("echo \"$*\" >> '{}'", log.display()),
        );

        // 线程结束即子进程已被 wait 回收
        let mut ran = false;
        for _ in 0..20 {
            sink.close_remote(42).join().unwrap();
            if log.exists() {
                ran = true;
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert!(ran, "gdbus was never run");

        let calls = fs::read_to_string(&log).unwrap();
        let line = calls.lines().next().unwrap();
        assert!(line.contains("org.freedesktop.Notifications.CloseNotification"));
        assert!(line.ends_with("42"));
    }
}
