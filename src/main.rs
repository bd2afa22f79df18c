//! Buddy Notify CLI
//!
//! 回放宿主事件脚本，驱动通知引擎弹出桌面通知

use anyhow::{Context, Result};
use buddy_notify::{
    ConnectionState, Engine, HostSignal, LogSink, NotificationSink, NotifyConfig, NotifySendConfig,
    NotifySendSink, StaticHost,
};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "buddy-notify")]
#[command(about = "Buddy Notify - 好友上下线与消息的桌面通知")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 回放事件脚本（JSONL）
    Replay {
        /// 宿主名单文件（JSON）
        roster: PathBuf,
        /// 事件脚本，每行一个步骤
        script: PathBuf,
        /// 只记录日志，不弹窗
        #[arg(long)]
        dry_run: bool,
        /// 配置文件路径（默认 ~/.config/buddy-notify/config.json）
        #[arg(long)]
        config: Option<PathBuf>,
        /// 脚本结束后继续等待回调的时间（毫秒）
        #[arg(long, default_value = "6000")]
        linger_ms: u64,
    },
    /// 打印生效的配置
    Config {
        /// 配置文件路径
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// 脚本中的一步
#[derive(Debug, Deserialize)]
struct ReplayStep {
    /// 执行前等待的毫秒数
    #[serde(default)]
    after_ms: u64,
    /// 投递宿主信号
    #[serde(default)]
    emit: Option<HostSignal>,
    /// 修改账号连接状态
    #[serde(default)]
    connection: Option<ConnectionChange>,
}

#[derive(Debug, Deserialize)]
struct ConnectionChange {
    account_id: String,
    state: ConnectionState,
}

fn load_config(path: Option<&Path>) -> NotifyConfig {
    match path {
        Some(path) => NotifyConfig::load_from(path),
        None => NotifyConfig::load(),
    }
}

/// 读取脚本，跳过空行和 `#` 注释
fn read_script(path: &Path) -> Result<Vec<ReplayStep>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Cannot read script {}", path.display()))?;

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(idx, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("{}:{}: invalid step", path.display(), idx + 1))
        })
        .collect()
}

async fn replay(
    roster: &Path,
    script: &Path,
    dry_run: bool,
    config: NotifyConfig,
    linger: Duration,
) -> Result<()> {
    let host = Arc::new(StaticHost::load(roster)?);
    let steps = read_script(script)?;
    info!(steps = steps.len(), dry_run, "Replaying script");

    let sink: Arc<dyn NotificationSink> = if dry_run {
        Arc::new(LogSink::new())
    } else {
        Arc::new(NotifySendSink::new(NotifySendConfig::new(&config.app_name)))
    };

    let mut engine = Engine::new(config, host.clone(), sink);
    engine.attach(host.as_ref());

    let cancel = CancellationToken::new();

    let driver = {
        let host = host.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            for step in steps {
                if step.after_ms > 0 {
                    sleep(Duration::from_millis(step.after_ms)).await;
                }
                if let Some(change) = step.connection {
                    debug!(account_id = %change.account_id, state = ?change.state, "Connection state changed");
                    host.set_connection(&change.account_id, change.state);
                }
                if let Some(signal) = step.emit {
                    if host.emit(signal) == 0 {
                        warn!("Signal had no subscribers");
                    }
                }
            }
            sleep(linger).await;
            cancel.cancel();
        })
    };

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    engine.run(cancel).await;
    driver.abort();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // 通过 RUST_LOG 环境变量控制日志级别，默认为 info
    // 例如: RUST_LOG=debug buddy-notify replay roster.json events.jsonl
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("buddy_notify=info"));

    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Replay {
            roster,
            script,
            dry_run,
            config,
            linger_ms,
        } => {
            let config = load_config(config.as_deref());
            replay(&roster, &script, dry_run, config, Duration::from_millis(linger_ms)).await?;
        }
        Commands::Config { config } => {
            let config = load_config(config.as_deref());
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
