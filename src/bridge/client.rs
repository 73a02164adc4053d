//! 客户端状态桥接核心
//!
//! `ClientBridge` 是 UI 唯一面对的可变外观：把 UI 意图转成原生调用，
//! 再把原生结果与事件合并回本地状态。对象本身只是 `Arc` 包装，可随意克隆。

use crate::bridge::config::{ClientConfig, DEFAULT_CONFIG_FILE};
use crate::bridge::db::prefs_db_url;
use crate::bridge::listener::{self, BridgeListener, EmptyBridgeListener};
use crate::bridge::native::{MockSdk, NativeConnector, NativeHandle, NativeResult, NativeSdk, SdkVersion};
use crate::bridge::poller::{spawn_poller, PollCadence};
use crate::bridge::prefs::{keys, PrefsDao, PrivacySettings, Visibility};
use crate::bridge::relay::{MediaRelayLog, OfflinePayloadLog};
use crate::bridge::state::BridgeState;
use crate::bridge::types::{BridgeError, BridgeResult, SessionSnapshot};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

pub const MOCK_FALLBACK_STATUS: &str = "Native SDK not available, using mock data";

/// 运行时选项
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    /// 偏好库与默认配置文件所在目录
    pub data_dir: PathBuf,
    pub cadence: PollCadence,
    /// 己方消息可召回的时长
    pub recall_window: Duration,
    /// 删除后可撤销的时长
    pub undo_grace: Duration,
    /// 单次加载历史的条数上限
    pub history_limit: u32,
    /// 登录后是否自动启动轮询任务；关闭时由调用方驱动 `poll_once`
    pub auto_poll: bool,
    /// 是否把偏好写入数据目录下的 SQLite 文件
    pub persist_prefs: bool,
}

impl BridgeOptions {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            cadence: PollCadence::default(),
            recall_window: Duration::from_secs(120),
            undo_grace: Duration::from_millis(3500),
            history_limit: 200,
            auto_poll: true,
            persist_prefs: true,
        }
    }
}

pub(crate) struct BridgeInner {
    pub(crate) options: BridgeOptions,
    pub(crate) state: Mutex<BridgeState>,
    pub(crate) listener: Arc<dyn BridgeListener>,
}

/// 客户端状态桥接
#[derive(Clone)]
pub struct ClientBridge {
    pub(crate) inner: Arc<BridgeInner>,
}

impl ClientBridge {
    pub fn new(options: BridgeOptions) -> Self {
        Self::with_listener(options, Arc::new(EmptyBridgeListener))
    }

    /// 创建并注册监听器
    pub fn with_listener(options: BridgeOptions, listener: Arc<dyn BridgeListener>) -> Self {
        let state = BridgeState::new(options.recall_window, options.undo_grace);
        Self {
            inner: Arc::new(BridgeInner {
                options,
                state: Mutex::new(state),
                listener,
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<BridgeInner>) -> Self {
        Self { inner }
    }

    pub fn options(&self) -> &BridgeOptions {
        &self.inner.options
    }

    // ---------- 内部工具 ----------

    /// 取出累积的通知、释放状态锁后派发
    pub(crate) fn flush(&self, mut st: MutexGuard<'_, BridgeState>) {
        let batch = st.take_notifications();
        drop(st);
        listener::dispatch(&self.inner.listener, batch);
    }

    /// 就绪检查；未就绪同样写入 `last_error`
    pub(crate) async fn ready(&self, need_login: bool) -> BridgeResult<NativeHandle> {
        let mut st = self.inner.state.lock().await;
        let result = if need_login {
            st.require_login()
        } else {
            st.require_native()
        };
        if result.is_err() {
            st.note(&result);
            self.flush(st);
        }
        result
    }

    /// 记录一次操作结果到 `last_error`
    pub(crate) async fn record<T>(&self, result: &BridgeResult<T>) {
        let mut st = self.inner.state.lock().await;
        st.note(result);
        self.flush(st);
    }

    /// 只需要一次原生调用、不改动本地集合的操作
    pub(crate) async fn call_simple<T, F>(
        &self,
        need_login: bool,
        op: &'static str,
        f: F,
    ) -> BridgeResult<T>
    where
        F: FnOnce(&mut dyn NativeSdk) -> NativeResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let native = self.ready(need_login).await?;
        let result = native.call(op, f).await.map_err(BridgeError::from);
        if let Err(e) = &result {
            warn!("[Bridge] ❌ {} 失败: {}", op, e);
        }
        self.record(&result).await;
        result
    }

    // ---------- 生命周期 ----------

    /// 初始化：准备配置文件、连接原生库（不可用时退回模拟实现）、打开偏好库
    pub async fn init(
        &self,
        config_path: Option<&Path>,
        connector: &dyn NativeConnector,
    ) -> BridgeResult<()> {
        {
            let st = self.inner.state.lock().await;
            if st.initialized {
                debug!("[Bridge] 已初始化，跳过");
                return Ok(());
            }
        }
        let options = &self.inner.options;
        let config_path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| options.data_dir.join(DEFAULT_CONFIG_FILE));
        let config = ClientConfig::load_or_create(&config_path).map_err(|e| {
            error!("[Bridge] ❌ 配置文件不可用: {:#}", e);
            BridgeError::invalid(format!("{:#}", e))
        })?;

        let (sdk, is_mock): (Box<dyn NativeSdk>, bool) = match connector.connect(&config_path) {
            Ok(sdk) => (sdk, false),
            Err(e) => {
                warn!("[Bridge] ⚠️ 原生库不可用（{}），使用模拟数据", e);
                let (mock, _control) = MockSdk::new();
                (Box::new(mock), true)
            }
        };
        let native = NativeHandle::new(sdk);
        let (version, capabilities) = native
            .call("version", |sdk| Ok((sdk.version(), sdk.capabilities())))
            .await
            .unwrap_or((SdkVersion::default(), 0));

        let prefs = if options.persist_prefs {
            open_prefs(&options.data_dir).await
        } else {
            None
        };
        let privacy = match &prefs {
            Some(dao) => dao.load_privacy().await.unwrap_or_else(|e| {
                warn!("[Bridge] ⚠️ 读取隐私设置失败，使用默认值: {:#}", e);
                PrivacySettings::default()
            }),
            None => PrivacySettings::default(),
        };

        let mut st = self.inner.state.lock().await;
        st.config = config;
        st.native = Some(native);
        st.prefs = prefs;
        st.privacy = privacy;
        st.is_mock = is_mock;
        st.sdk_version = version;
        st.capabilities = capabilities;
        st.status_message = if is_mock {
            MOCK_FALLBACK_STATUS.to_string()
        } else {
            String::new()
        };
        st.initialized = true;
        st.mark_session();
        info!(
            "[Bridge] ✅ 初始化完成 (sdk={}, mock={}, config={})",
            version,
            is_mock,
            config_path.display()
        );
        self.flush(st);
        Ok(())
    }

    /// 停止轮询并释放原生句柄；可重复调用
    pub async fn dispose(&self) {
        let mut st = self.inner.state.lock().await;
        if !st.initialized && st.native.is_none() && st.poll_task.is_none() {
            return;
        }
        st.stop_polling();
        st.commit_all_deletes().await;
        let epoch = st.epoch + 1;
        *st = BridgeState::new(self.inner.options.recall_window, self.inner.options.undo_grace);
        st.epoch = epoch;
        st.mark_session();
        info!("[Bridge] 🧹 已释放");
        self.flush(st);
    }

    // ---------- 会话 ----------

    pub async fn register(&self, username: &str, password: &str) -> BridgeResult<()> {
        let native = self.ready(false).await?;
        let (username, password) = credentials(username, password)?;
        let result = native
            .call("register", move |sdk| sdk.register(&username, &password))
            .await
            .map_err(BridgeError::from);
        self.record(&result).await;
        result
    }

    /// 登录；成功后启动轮询，失败时清空 token 与用户名
    pub async fn login(&self, username: &str, password: &str) -> BridgeResult<()> {
        let native = self.ready(false).await?;
        let (user, password) = credentials(username, password)?;
        let name = user.clone();
        let result = native
            .call("login", move |sdk| sdk.login(&name, &password))
            .await
            .map_err(BridgeError::from);
        let session = native.call("session", |sdk| Ok(sdk.session())).await;

        let mut st = self.inner.state.lock().await;
        st.stop_polling();
        match &result {
            Ok(()) => {
                st.logged_in = true;
                st.username = user;
                st.ticks = 0;
                if let Ok(s) = session {
                    st.apply_session(s);
                }
                st.mark_session();
                info!("[Bridge] ✅ 登录成功: {}", st.username);
                if self.inner.options.auto_poll {
                    let task = spawn_poller(
                        Arc::downgrade(&self.inner),
                        st.epoch,
                        self.inner.options.cadence.clone(),
                    );
                    st.poll_task = Some(task);
                }
            }
            Err(e) => {
                warn!("[Bridge] ❌ 登录失败: {}", e);
                st.clear_session();
            }
        }
        st.note(&result);
        self.flush(st);
        result
    }

    /// 登出；成功后停止轮询并清空会话相关的集合
    pub async fn logout(&self) -> BridgeResult<()> {
        let native = self.ready(true).await?;
        let result = native
            .call("logout", |sdk| sdk.logout())
            .await
            .map_err(BridgeError::from);
        let mut st = self.inner.state.lock().await;
        if result.is_ok() {
            st.stop_polling();
            st.commit_all_deletes().await;
            st.clear_session();
            st.reset_collections();
            info!("[Bridge] 👋 已登出");
        }
        st.note(&result);
        self.flush(st);
        result
    }

    /// 仅在已登录时登出
    pub async fn ensure_logged_out(&self) -> BridgeResult<()> {
        if self.is_logged_in().await {
            self.logout().await
        } else {
            Ok(())
        }
    }

    pub async fn relogin(&self) -> BridgeResult<()> {
        let native = self.ready(true).await?;
        let result = native
            .call("relogin", |sdk| sdk.relogin())
            .await
            .map_err(BridgeError::from);
        self.refresh_session(&native, &result).await;
        result
    }

    pub async fn heartbeat(&self) -> BridgeResult<()> {
        self.call_simple(true, "heartbeat", |sdk| sdk.heartbeat()).await
    }

    /// 确认待定的服务器指纹
    pub async fn trust_pending_server(&self, pin: &str) -> BridgeResult<()> {
        let native = self.ready(false).await?;
        let pin = required(pin, "Pin is empty")?;
        let result = native
            .call("trust_server", move |sdk| sdk.trust_pending_server(&pin))
            .await
            .map_err(BridgeError::from);
        self.refresh_session(&native, &result).await;
        result
    }

    /// 确认待定的对端指纹
    pub async fn trust_pending_peer(&self, pin: &str) -> BridgeResult<()> {
        let native = self.ready(false).await?;
        let pin = required(pin, "Pin is empty")?;
        let result = native
            .call("trust_peer", move |sdk| sdk.trust_pending_peer(&pin))
            .await
            .map_err(BridgeError::from);
        self.refresh_session(&native, &result).await;
        result
    }

    async fn refresh_session(&self, native: &NativeHandle, result: &BridgeResult<()>) {
        let session = native.call("session", |sdk| Ok(sdk.session())).await;
        let mut st = self.inner.state.lock().await;
        if let Ok(s) = session {
            st.apply_session(s);
        }
        st.note(result);
        self.flush(st);
    }

    pub async fn session(&self) -> SessionSnapshot {
        self.inner.state.lock().await.snapshot()
    }

    pub async fn is_logged_in(&self) -> bool {
        self.inner.state.lock().await.logged_in
    }

    pub async fn is_mock(&self) -> bool {
        self.inner.state.lock().await.is_mock
    }

    pub async fn is_remote_mode(&self) -> bool {
        self.inner.state.lock().await.remote_mode
    }

    pub async fn last_error(&self) -> String {
        self.inner.state.lock().await.last_error.clone()
    }

    pub async fn connection_detail(&self) -> String {
        self.inner.state.lock().await.connection_detail()
    }

    pub async fn sdk_version(&self) -> SdkVersion {
        self.inner.state.lock().await.sdk_version
    }

    pub async fn capabilities(&self) -> u32 {
        self.inner.state.lock().await.capabilities
    }

    pub async fn config(&self) -> ClientConfig {
        self.inner.state.lock().await.config.clone()
    }

    /// 轮询任务是否在运行
    pub async fn is_polling(&self) -> bool {
        self.inner
            .state
            .lock()
            .await
            .poll_task
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// 停止轮询（登出、切换账号前）；重复调用无副作用
    pub async fn stop_polling(&self) {
        self.inner.state.lock().await.stop_polling();
    }

    // ---------- 隐私设置 ----------

    pub async fn privacy(&self) -> PrivacySettings {
        self.inner.state.lock().await.privacy
    }

    pub async fn set_read_receipts_enabled(&self, enabled: bool) -> BridgeResult<()> {
        self.ready(false).await?;
        let mut st = self.inner.state.lock().await;
        st.privacy.read_receipts_enabled = enabled;
        st.persist_bool(keys::READ_RECEIPTS_ENABLED, enabled).await;
        Ok(())
    }

    pub async fn set_screenshot_alerts_enabled(&self, enabled: bool) -> BridgeResult<()> {
        self.ready(false).await?;
        let mut st = self.inner.state.lock().await;
        st.privacy.screenshot_alerts_enabled = enabled;
        st.persist_bool(keys::SCREENSHOT_ALERTS_ENABLED, enabled)
            .await;
        Ok(())
    }

    pub async fn set_privacy_last_seen(&self, value: &str) -> BridgeResult<()> {
        self.set_visibility(keys::PRIVACY_LAST_SEEN, value).await
    }

    pub async fn set_privacy_profile_photo(&self, value: &str) -> BridgeResult<()> {
        self.set_visibility(keys::PRIVACY_PROFILE_PHOTO, value).await
    }

    pub async fn set_privacy_group_invites(&self, value: &str) -> BridgeResult<()> {
        self.set_visibility(keys::PRIVACY_GROUP_INVITES, value).await
    }

    async fn set_visibility(&self, key: &'static str, value: &str) -> BridgeResult<()> {
        self.ready(false).await?;
        let vis: Visibility = value.parse()?;
        let mut st = self.inner.state.lock().await;
        match key {
            keys::PRIVACY_LAST_SEEN => st.privacy.last_seen = vis,
            keys::PRIVACY_PROFILE_PHOTO => st.privacy.profile_photo = vis,
            _ => st.privacy.group_invites = vis,
        }
        st.persist_string(key, vis.as_str()).await;
        debug!("[Bridge] 隐私设置 {} = {}", key, vis);
        Ok(())
    }

    // ---------- 中继日志 ----------

    pub async fn media_relay_events(&self) -> Vec<MediaRelayLog> {
        self.inner.state.lock().await.media_relay.snapshot()
    }

    pub async fn offline_payloads(&self) -> Vec<OfflinePayloadLog> {
        self.inner.state.lock().await.offline_payloads.snapshot()
    }

    pub async fn clear_media_relay_events(&self) {
        self.inner.state.lock().await.media_relay.clear();
    }

    pub async fn clear_offline_payloads(&self) {
        self.inner.state.lock().await.offline_payloads.clear();
    }
}

/// 打开偏好库；文件库失败时退回内存库，两者都失败则不持久化
async fn open_prefs(data_dir: &Path) -> Option<PrefsDao> {
    if let Err(e) = std::fs::create_dir_all(data_dir) {
        warn!("[Bridge] ⚠️ 创建数据目录失败 {}: {}", data_dir.display(), e);
    }
    match PrefsDao::open(&prefs_db_url(data_dir)).await {
        Ok(dao) => return Some(dao),
        Err(e) => warn!("[Bridge] ⚠️ 打开偏好库失败，改用内存库: {:#}", e),
    }
    match PrefsDao::open_in_memory().await {
        Ok(dao) => Some(dao),
        Err(e) => {
            error!("[Bridge] ❌ 内存偏好库也不可用: {:#}", e);
            None
        }
    }
}

/// 必填字段：去掉首尾空白后不能为空
pub(crate) fn required(value: &str, message: &str) -> BridgeResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(BridgeError::invalid(message));
    }
    Ok(trimmed.to_string())
}

fn credentials(username: &str, password: &str) -> BridgeResult<(String, String)> {
    let username = required(username, "Username is empty")?;
    if password.is_empty() {
        return Err(BridgeError::invalid("Password is empty"));
    }
    Ok((username, password.to_string()))
}
