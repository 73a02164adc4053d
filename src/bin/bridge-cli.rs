//! 桥接层 CLI（测试版）
//!
//! 非交互式：初始化桥接、登录并轮询指定时长，打印所有监听器回调。
//! 原生库不可用时自动使用模拟数据。

use anyhow::{Context, Result};
use clap::Parser;
use e2ee_client_bridge::bridge::call::{GroupCallRoomUi, IncomingCall};
use e2ee_client_bridge::bridge::conversation::Conversation;
use e2ee_client_bridge::bridge::friend::{FriendRequestUi, FriendUi};
use e2ee_client_bridge::bridge::message::ChatMessage;
use e2ee_client_bridge::bridge::native::{PendingPeerTrust, PendingServerTrust};
use e2ee_client_bridge::{
    BridgeListener, BridgeOptions, ClientBridge, ConvRef, SessionSnapshot, UnavailableConnector,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

/// 桥接层 CLI
#[derive(Parser, Debug)]
#[command(name = "bridge-cli")]
#[command(about = "E2EE 客户端桥接 CLI - 登录并打印状态变化", long_about = None)]
struct Args {
    /// 数据目录（配置文件与偏好库）
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,

    /// 配置文件路径（默认: <data_dir>/client_config.ini）
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long, default_value = "demo")]
    username: String,

    #[arg(short, long, default_value = "demo")]
    password: String,

    /// 登录前先注册
    #[arg(long)]
    register: bool,

    /// 运行时长（秒），0 表示持续运行
    #[arg(short, long, default_value = "0")]
    duration: u64,

    /// 日志级别（默认: info,e2ee_client_bridge=debug）
    #[arg(long, default_value = "info,e2ee_client_bridge=debug")]
    log_level: String,
}

/// 初始化日志（同时输出到 stdout 和文件）
fn init_logger(log_level: &str) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // 优先使用环境变量 RUST_LOG
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("debug.log")
        .context("无法创建日志文件 debug.log")?;

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    // 文件不需要颜色
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    info!("[CLI] 📝 日志已同时输出到控制台和文件: debug.log");
    Ok(())
}

/// 打印所有回调
struct CliListener;

#[async_trait::async_trait]
impl BridgeListener for CliListener {
    async fn on_session_changed(&self, s: SessionSnapshot) {
        info!(
            "[CLI/Session] 🔐 loggedIn={} user={} device={} remoteOk={} status={}",
            s.logged_in, s.username, s.device_id, s.remote_ok, s.status_message
        );
        if !s.last_error.is_empty() {
            error!("[CLI/Session] ❌ {}", s.last_error);
        }
    }

    async fn on_conversations_changed(&self, conversations: Vec<Conversation>) {
        info!("[CLI/Conversation] 📋 会话列表（共 {} 个）", conversations.len());
        for conv in conversations.iter().take(5) {
            info!(
                "[CLI/Conversation]   - {} | 未读: {} | 最新: {}",
                conv.name,
                conv.unread_count,
                conv.last_message.chars().take(30).collect::<String>()
            );
        }
    }

    async fn on_messages_changed(&self, conv: ConvRef, messages: Vec<ChatMessage>) {
        if let Some(last) = messages.last() {
            info!(
                "[CLI/Message] 📨 {} 共 {} 条，最新: {}: {}",
                conv,
                messages.len(),
                last.sender,
                last.preview_text()
            );
        }
    }

    async fn on_friends_changed(&self, friends: Vec<FriendUi>) {
        let names: Vec<&str> = friends.iter().map(|f| f.display_name()).collect();
        info!("[CLI/Friend] 👥 好友列表: {:?}", names);
    }

    async fn on_friend_requests_changed(&self, requests: Vec<FriendRequestUi>) {
        info!("[CLI/Friend] 📝 好友申请: {} 条", requests.len());
    }

    async fn on_call_rooms_changed(&self, rooms: Vec<GroupCallRoomUi>) {
        info!("[CLI/Call] 📞 群通话房间: {} 个", rooms.len());
    }

    async fn on_incoming_call(&self, call: Option<IncomingCall>) {
        match call {
            Some(c) => info!("[CLI/Call] 🔔 来电: {} (video={})", c.peer, c.video),
            None => info!("[CLI/Call] 🔕 来电已结束"),
        }
    }

    async fn on_trust_required(
        &self,
        server: Option<PendingServerTrust>,
        peer: Option<PendingPeerTrust>,
    ) {
        if let Some(s) = server {
            warn!("[CLI/Trust] 🔏 需要确认服务器指纹: {}", s.fingerprint);
        }
        if let Some(p) = peer {
            warn!("[CLI/Trust] 🔏 需要确认 {} 的指纹: {}", p.peer, p.fingerprint);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(&args.log_level)?;

    info!("[CLI] 🚀 E2EE 客户端桥接 CLI（测试模式）");
    info!("[CLI] 👤 用户: {}", args.username);
    info!("[CLI] ⏱️  运行时长: {} 秒（0=持续运行）", args.duration);

    std::fs::create_dir_all(&args.data_dir)
        .with_context(|| format!("无法创建数据目录 {}", args.data_dir.display()))?;
    let bridge = ClientBridge::with_listener(BridgeOptions::new(&args.data_dir), Arc::new(CliListener));
    bridge
        .init(args.config.as_deref(), &UnavailableConnector)
        .await
        .map_err(|e| anyhow::anyhow!("初始化失败: {}", e))?;
    info!(
        "[CLI] ✅ 初始化完成 (sdk={}, mock={})",
        bridge.sdk_version().await,
        bridge.is_mock().await
    );

    if args.register {
        if let Err(e) = bridge.register(&args.username, &args.password).await {
            warn!("[CLI] ⚠️ 注册失败: {}", e);
        }
    }

    info!("[CLI] 🔐 正在登录...");
    bridge
        .login(&args.username, &args.password)
        .await
        .map_err(|e| anyhow::anyhow!("登录失败: {}", e))?;
    info!("[CLI] ✅ 登录成功！{}", bridge.connection_detail().await);

    info!("[CLI] 📥 开始轮询...");
    if args.duration > 0 {
        info!("[CLI] ⏰ {} 秒后自动退出", args.duration);
        sleep(Duration::from_secs(args.duration)).await;
    } else {
        info!("[CLI] ⏰ 持续运行中，按 Ctrl+C 退出");
        tokio::signal::ctrl_c().await.context("等待 Ctrl+C 失败")?;
    }

    info!("[CLI] 📬 总未读数: {}", bridge.total_unread().await);
    if let Err(e) = bridge.logout().await {
        warn!("[CLI] ⚠️ 登出失败: {}", e);
    }
    bridge.dispose().await;
    info!("[CLI] 👋 程序退出");
    Ok(())
}
