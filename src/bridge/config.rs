//! 客户端 INI 配置
//!
//! 文件不存在时按默认值创建一次，之后只读不写。
//! 语法：`#`/`;` 注释，`[section]` 节，`key=value` 键值；其余行视为错误。

use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// 默认配置文件名
pub const DEFAULT_CONFIG_FILE: &str = "client_config.ini";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyType {
    None,
    Socks5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSyncRole {
    Primary,
    Linked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverTrafficMode {
    Auto,
    On,
    Off,
}

/// [client]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSection {
    pub server_ip: String,
    pub server_port: u16,
    pub use_tls: bool,
    pub require_tls: bool,
    pub trust_store: String,
    pub require_pinned_fingerprint: bool,
    pub pinned_fingerprint: String,
    pub auth_mode: String,
    pub allow_legacy_login: bool,
}

/// [proxy]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySection {
    pub proxy_type: ProxyType,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

/// [device_sync]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSyncSection {
    pub enabled: bool,
    pub role: DeviceSyncRole,
    pub key_path: String,
}

/// [identity]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentitySection {
    pub rotation_days: u32,
    pub legacy_retention_days: u32,
    pub tpm_enable: bool,
    pub tpm_require: bool,
}

/// [traffic]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficSection {
    pub cover_traffic_mode: CoverTrafficMode,
    pub cover_traffic_interval_sec: u32,
}

/// [performance]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerformanceSection {
    pub pqc_precompute_pool: u32,
}

/// [kt]（密钥透明）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KtSection {
    pub require_signature: bool,
    pub gossip_alert_threshold: u32,
    pub root_pubkey_hex: String,
    pub root_pubkey_path: String,
}

/// [kcp]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KcpSection {
    pub enable: bool,
    pub server_port: u16,
    pub mtu: u32,
    pub snd_wnd: u32,
    pub rcv_wnd: u32,
    pub nodelay: u32,
    pub interval: u32,
    pub resend: u32,
    pub nc: u32,
    pub min_rto: u32,
    pub request_timeout_ms: u32,
    pub session_idle_sec: u32,
}

/// [media]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSection {
    pub audio_delay_ms: u32,
    pub video_delay_ms: u32,
    pub audio_max_frames: u32,
    pub video_max_frames: u32,
    pub pull_max_packets: u32,
    pub pull_wait_ms: u32,
    pub group_pull_max_packets: u32,
    pub group_pull_wait_ms: u32,
}

/// 客户端配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub client: ServerSection,
    pub proxy: ProxySection,
    pub device_sync: DeviceSyncSection,
    pub identity: IdentitySection,
    pub traffic: TrafficSection,
    pub performance: PerformanceSection,
    pub kt: KtSection,
    pub kcp: KcpSection,
    pub media: MediaSection,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client: ServerSection {
                server_ip: "127.0.0.1".to_string(),
                server_port: 9000,
                use_tls: true,
                require_tls: true,
                trust_store: "server_trust.ini".to_string(),
                require_pinned_fingerprint: true,
                pinned_fingerprint: String::new(),
                auth_mode: "opaque".to_string(),
                allow_legacy_login: false,
            },
            proxy: ProxySection {
                proxy_type: ProxyType::None,
                host: String::new(),
                port: 0,
                username: String::new(),
                password: String::new(),
            },
            device_sync: DeviceSyncSection {
                enabled: false,
                role: DeviceSyncRole::Primary,
                key_path: String::new(),
            },
            identity: IdentitySection {
                rotation_days: 90,
                legacy_retention_days: 180,
                tpm_enable: true,
                tpm_require: false,
            },
            traffic: TrafficSection {
                cover_traffic_mode: CoverTrafficMode::Auto,
                cover_traffic_interval_sec: 30,
            },
            performance: PerformanceSection {
                pqc_precompute_pool: 4,
            },
            kt: KtSection {
                require_signature: true,
                gossip_alert_threshold: 3,
                root_pubkey_hex: String::new(),
                root_pubkey_path: String::new(),
            },
            kcp: KcpSection {
                enable: false,
                server_port: 0,
                mtu: 1400,
                snd_wnd: 256,
                rcv_wnd: 256,
                nodelay: 1,
                interval: 10,
                resend: 2,
                nc: 1,
                min_rto: 30,
                request_timeout_ms: 5000,
                session_idle_sec: 60,
            },
            media: MediaSection {
                audio_delay_ms: 60,
                video_delay_ms: 120,
                audio_max_frames: 256,
                video_max_frames: 256,
                pull_max_packets: 32,
                pull_wait_ms: 0,
                group_pull_max_packets: 64,
                group_pull_wait_ms: 0,
            },
        }
    }
}

type Sections = BTreeMap<String, BTreeMap<String, String>>;

/// 把 INI 文本拆成 节 -> 键 -> 值
fn parse_sections(text: &str) -> Result<Sections> {
    let mut sections = Sections::new();
    let mut current = String::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            current = line[1..line.len() - 1].trim().to_string();
            sections.entry(current.clone()).or_default();
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(anyhow!("invalid line {}", idx + 1));
        };
        sections
            .entry(current.clone())
            .or_default()
            .insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(sections)
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// 单节读取器，非法值保留默认
struct SectionReader<'a> {
    values: Option<&'a BTreeMap<String, String>>,
}

impl<'a> SectionReader<'a> {
    fn raw(&self, key: &str) -> Option<&'a str> {
        self.values.and_then(|m| m.get(key)).map(String::as_str)
    }

    fn string(&self, key: &str, target: &mut String) {
        if let Some(v) = self.raw(key) {
            *target = v.to_string();
        }
    }

    fn boolean(&self, key: &str, target: &mut bool) {
        if let Some(v) = self.raw(key).and_then(parse_bool) {
            *target = v;
        }
    }

    fn number(&self, key: &str, target: &mut u32) {
        if let Some(v) = self.raw(key).and_then(|v| v.parse::<u32>().ok()) {
            *target = v;
        }
    }

    fn port(&self, key: &str, target: &mut u16) {
        if let Some(v) = self.raw(key).and_then(|v| v.parse::<i64>().ok()) {
            *target = v.clamp(0, u16::MAX as i64) as u16;
        }
    }
}

impl ClientConfig {
    /// 解析 INI 文本
    pub fn parse(text: &str) -> Result<Self> {
        let sections = parse_sections(text)?;
        let reader = |name: &str| SectionReader {
            values: sections.get(name),
        };
        let mut cfg = ClientConfig::default();

        let s = reader("client");
        s.string("server_ip", &mut cfg.client.server_ip);
        s.port("server_port", &mut cfg.client.server_port);
        s.boolean("use_tls", &mut cfg.client.use_tls);
        s.boolean("require_tls", &mut cfg.client.require_tls);
        s.string("trust_store", &mut cfg.client.trust_store);
        s.boolean(
            "require_pinned_fingerprint",
            &mut cfg.client.require_pinned_fingerprint,
        );
        s.string("pinned_fingerprint", &mut cfg.client.pinned_fingerprint);
        s.string("auth_mode", &mut cfg.client.auth_mode);
        s.boolean("allow_legacy_login", &mut cfg.client.allow_legacy_login);
        if cfg.client.server_port == 0 {
            return Err(anyhow!("server_port missing"));
        }

        let s = reader("proxy");
        if let Some(t) = s.raw("type") {
            cfg.proxy.proxy_type = match t.to_ascii_lowercase().as_str() {
                "socks5" => ProxyType::Socks5,
                _ => ProxyType::None,
            };
        }
        s.string("host", &mut cfg.proxy.host);
        s.port("port", &mut cfg.proxy.port);
        s.string("username", &mut cfg.proxy.username);
        s.string("password", &mut cfg.proxy.password);

        let s = reader("device_sync");
        s.boolean("enabled", &mut cfg.device_sync.enabled);
        if let Some(r) = s.raw("role") {
            cfg.device_sync.role = match r.to_ascii_lowercase().as_str() {
                "linked" => DeviceSyncRole::Linked,
                _ => DeviceSyncRole::Primary,
            };
        }
        s.string("key_path", &mut cfg.device_sync.key_path);

        let s = reader("identity");
        s.number("rotation_days", &mut cfg.identity.rotation_days);
        s.number(
            "legacy_retention_days",
            &mut cfg.identity.legacy_retention_days,
        );
        s.boolean("tpm_enable", &mut cfg.identity.tpm_enable);
        s.boolean("tpm_require", &mut cfg.identity.tpm_require);

        let s = reader("traffic");
        if let Some(m) = s.raw("cover_traffic_mode") {
            cfg.traffic.cover_traffic_mode = match m.to_ascii_lowercase().as_str() {
                "on" | "1" | "true" => CoverTrafficMode::On,
                "off" | "0" | "false" => CoverTrafficMode::Off,
                _ => CoverTrafficMode::Auto,
            };
        }
        s.number(
            "cover_traffic_interval_sec",
            &mut cfg.traffic.cover_traffic_interval_sec,
        );

        reader("performance").number(
            "pqc_precompute_pool",
            &mut cfg.performance.pqc_precompute_pool,
        );

        let s = reader("kt");
        s.boolean("require_signature", &mut cfg.kt.require_signature);
        s.number("gossip_alert_threshold", &mut cfg.kt.gossip_alert_threshold);
        s.string("root_pubkey_hex", &mut cfg.kt.root_pubkey_hex);
        s.string("root_pubkey_path", &mut cfg.kt.root_pubkey_path);

        let s = reader("kcp");
        s.boolean("enable", &mut cfg.kcp.enable);
        s.port("server_port", &mut cfg.kcp.server_port);
        s.number("mtu", &mut cfg.kcp.mtu);
        if !(576..=1500).contains(&cfg.kcp.mtu) {
            cfg.kcp.mtu = 1400;
        }
        s.number("snd_wnd", &mut cfg.kcp.snd_wnd);
        s.number("rcv_wnd", &mut cfg.kcp.rcv_wnd);
        s.number("nodelay", &mut cfg.kcp.nodelay);
        s.number("interval", &mut cfg.kcp.interval);
        s.number("resend", &mut cfg.kcp.resend);
        s.number("nc", &mut cfg.kcp.nc);
        s.number("min_rto", &mut cfg.kcp.min_rto);
        s.number("request_timeout_ms", &mut cfg.kcp.request_timeout_ms);
        s.number("session_idle_sec", &mut cfg.kcp.session_idle_sec);

        let s = reader("media");
        s.number("audio_delay_ms", &mut cfg.media.audio_delay_ms);
        s.number("video_delay_ms", &mut cfg.media.video_delay_ms);
        s.number("audio_max_frames", &mut cfg.media.audio_max_frames);
        s.number("video_max_frames", &mut cfg.media.video_max_frames);
        s.number("pull_max_packets", &mut cfg.media.pull_max_packets);
        s.number("pull_wait_ms", &mut cfg.media.pull_wait_ms);
        s.number(
            "group_pull_max_packets",
            &mut cfg.media.group_pull_max_packets,
        );
        s.number("group_pull_wait_ms", &mut cfg.media.group_pull_wait_ms);

        Ok(cfg)
    }

    /// 读取已存在的配置文件
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("解析配置文件失败: {}", path.display()))
    }

    /// 文件不存在时写入默认配置，存在时只读取
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            debug!("[Config] 复用已有配置: {}", path.display());
            return Self::load(path);
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("创建配置目录失败: {}", parent.display()))?;
            }
        }
        let cfg = ClientConfig::default();
        std::fs::write(path, cfg.render())
            .with_context(|| format!("写入默认配置失败: {}", path.display()))?;
        info!("[Config] 📝 已创建默认配置: {}", path.display());
        Ok(cfg)
    }

    /// 渲染为 INI 文本
    pub fn render(&self) -> String {
        let b = |v: bool| if v { "1" } else { "0" };
        let proxy_type = match self.proxy.proxy_type {
            ProxyType::None => "none",
            ProxyType::Socks5 => "socks5",
        };
        let role = match self.device_sync.role {
            DeviceSyncRole::Primary => "primary",
            DeviceSyncRole::Linked => "linked",
        };
        let cover = match self.traffic.cover_traffic_mode {
            CoverTrafficMode::Auto => "auto",
            CoverTrafficMode::On => "on",
            CoverTrafficMode::Off => "off",
        };
        let c = &self.client;
        let k = &self.kcp;
        let m = &self.media;
        let mut out = String::new();
        out.push_str("# client configuration\n");
        out.push_str(&format!(
            "[client]\nserver_ip={}\nserver_port={}\nuse_tls={}\nrequire_tls={}\ntrust_store={}\nrequire_pinned_fingerprint={}\npinned_fingerprint={}\nauth_mode={}\nallow_legacy_login={}\n\n",
            c.server_ip,
            c.server_port,
            b(c.use_tls),
            b(c.require_tls),
            c.trust_store,
            b(c.require_pinned_fingerprint),
            c.pinned_fingerprint,
            c.auth_mode,
            b(c.allow_legacy_login),
        ));
        out.push_str(&format!(
            "[proxy]\ntype={}\nhost={}\nport={}\nusername={}\npassword={}\n\n",
            proxy_type, self.proxy.host, self.proxy.port, self.proxy.username, self.proxy.password,
        ));
        out.push_str(&format!(
            "[device_sync]\nenabled={}\nrole={}\nkey_path={}\n\n",
            b(self.device_sync.enabled),
            role,
            self.device_sync.key_path,
        ));
        out.push_str(&format!(
            "[identity]\nrotation_days={}\nlegacy_retention_days={}\ntpm_enable={}\ntpm_require={}\n\n",
            self.identity.rotation_days,
            self.identity.legacy_retention_days,
            b(self.identity.tpm_enable),
            b(self.identity.tpm_require),
        ));
        out.push_str(&format!(
            "[traffic]\ncover_traffic_mode={}\ncover_traffic_interval_sec={}\n\n",
            cover, self.traffic.cover_traffic_interval_sec,
        ));
        out.push_str(&format!(
            "[performance]\npqc_precompute_pool={}\n\n",
            self.performance.pqc_precompute_pool,
        ));
        out.push_str(&format!(
            "[kt]\nrequire_signature={}\ngossip_alert_threshold={}\nroot_pubkey_hex={}\nroot_pubkey_path={}\n\n",
            b(self.kt.require_signature),
            self.kt.gossip_alert_threshold,
            self.kt.root_pubkey_hex,
            self.kt.root_pubkey_path,
        ));
        out.push_str(&format!(
            "[kcp]\nenable={}\nserver_port={}\nmtu={}\nsnd_wnd={}\nrcv_wnd={}\nnodelay={}\ninterval={}\nresend={}\nnc={}\nmin_rto={}\nrequest_timeout_ms={}\nsession_idle_sec={}\n\n",
            b(k.enable),
            k.server_port,
            k.mtu,
            k.snd_wnd,
            k.rcv_wnd,
            k.nodelay,
            k.interval,
            k.resend,
            k.nc,
            k.min_rto,
            k.request_timeout_ms,
            k.session_idle_sec,
        ));
        out.push_str(&format!(
            "[media]\naudio_delay_ms={}\nvideo_delay_ms={}\naudio_max_frames={}\nvideo_max_frames={}\npull_max_packets={}\npull_wait_ms={}\ngroup_pull_max_packets={}\ngroup_pull_wait_ms={}\n",
            m.audio_delay_ms,
            m.video_delay_ms,
            m.audio_max_frames,
            m.video_max_frames,
            m.pull_max_packets,
            m.pull_wait_ms,
            m.group_pull_max_packets,
            m.group_pull_wait_ms,
        ));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendered_defaults_parse_back() {
        let cfg = ClientConfig::default();
        let parsed = ClientConfig::parse(&cfg.render()).unwrap();
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn parses_sections_and_ignores_unknown_keys() {
        let text = "\
# comment
[client]
server_ip = 10.0.0.2
server_port=7443
use_tls=0
[proxy]
type=socks5
host=proxy.local
port=1080
[kcp]
enable=1
mtu=9000
[unknown]
foo=bar
";
        let cfg = ClientConfig::parse(text).unwrap();
        assert_eq!(cfg.client.server_ip, "10.0.0.2");
        assert_eq!(cfg.client.server_port, 7443);
        assert!(!cfg.client.use_tls);
        assert_eq!(cfg.proxy.proxy_type, ProxyType::Socks5);
        assert_eq!(cfg.proxy.port, 1080);
        assert!(cfg.kcp.enable);
        // 超出范围的 mtu 回落为默认值
        assert_eq!(cfg.kcp.mtu, 1400);
        assert_eq!(cfg.media.pull_max_packets, 32);
    }

    #[test]
    fn invalid_line_is_an_error() {
        let err = ClientConfig::parse("[client]\nserver_port\n").unwrap_err();
        assert!(err.to_string().contains("invalid line 2"));
    }

    #[test]
    fn zero_port_is_rejected() {
        assert!(ClientConfig::parse("[client]\nserver_port=0\n").is_err());
    }

    #[test]
    fn file_is_created_once_and_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(DEFAULT_CONFIG_FILE);

        let first = ClientConfig::load_or_create(&path).unwrap();
        assert_eq!(first, ClientConfig::default());
        assert!(path.exists());

        std::fs::write(&path, "[client]\nserver_ip=192.168.1.9\nserver_port=9100\n").unwrap();
        let second = ClientConfig::load_or_create(&path).unwrap();
        assert_eq!(second.client.server_ip, "192.168.1.9");
        assert_eq!(second.client.server_port, 9100);

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("192.168.1.9"));
    }
}
