//! 配置模块职责：
//! 1. 读取 agent 运行所需的环境变量与持久化配置文件，并提供默认值。
//! 2. 校验 IoT Hub 主机名、设备 ID 与 token 有效期。
//! 3. 提供配置落盘与路径解析等通用能力。

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, anyhow};
use iotauth_sas::DEFAULT_TTL_SEC;
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Host;

/// IoT Hub 主机名环境变量。
const HUB_HOST_ENV: &str = "IOT_HUB_HOST";
/// 设备 ID 环境变量。
const DEVICE_ID_ENV: &str = "IOT_DEVICE_ID";
/// token 有效期环境变量（秒）。
const TTL_ENV: &str = "IOT_SAS_TTL_SEC";
/// 凭证文件路径环境变量。
const STORE_PATH_ENV: &str = "IOTAUTH_STORE_PATH";
/// 配置文件路径环境变量。
const CONFIG_PATH_ENV: &str = "IOTAUTH_CONFIG_PATH";
/// 强制按未校时处理的开关（诊断用）。
const ASSUME_UNSYNCED_ENV: &str = "IOTAUTH_ASSUME_UNSYNCED";
/// 持久化配置版本。
const AGENT_CONFIG_VERSION: u8 = 1;
/// 设备 ID 最大长度。
const MAX_DEVICE_ID_LEN: usize = 128;
/// 设备 ID 允许的非字母数字字符。
const DEVICE_ID_SYMBOLS: &str = "-.%_*?!(),:=@$'";

/// agent 持久化配置（不存密钥，密钥只进凭证文件）。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AgentPersistedConfig {
    /// 配置结构版本。
    #[serde(default = "default_config_version")]
    pub(crate) version: u8,
    /// IoT Hub 主机名。
    #[serde(default)]
    pub(crate) hub_host: Option<String>,
    /// 设备 ID。
    #[serde(default)]
    pub(crate) device_id: Option<String>,
    /// token 默认有效期（秒）。
    #[serde(default)]
    pub(crate) ttl_sec: Option<u64>,
    /// 凭证文件路径。
    #[serde(default)]
    pub(crate) store_path: Option<String>,
}

impl Default for AgentPersistedConfig {
    fn default() -> Self {
        Self {
            version: AGENT_CONFIG_VERSION,
            hub_host: None,
            device_id: None,
            ttl_sec: None,
            store_path: None,
        }
    }
}

/// 返回持久化配置版本默认值。
fn default_config_version() -> u8 {
    AGENT_CONFIG_VERSION
}

/// agent 运行时配置。
#[derive(Debug, Clone)]
pub(crate) struct AgentConfig {
    /// IoT Hub 主机名（未配置时为空）。
    pub(crate) hub_host: Option<String>,
    /// 设备 ID（未配置时为空）。
    pub(crate) device_id: Option<String>,
    /// token 默认有效期（秒）。
    pub(crate) ttl_sec: u64,
    /// 凭证文件路径。
    pub(crate) store_path: PathBuf,
    /// 是否强制走未校时时钟分支。
    pub(crate) assume_unsynced: bool,
}

impl AgentConfig {
    /// 从环境变量与配置文件构建配置；环境变量优先。
    pub(crate) fn from_env() -> anyhow::Result<Self> {
        let persisted = load_agent_persisted_config().unwrap_or_else(|err| {
            warn!("load agent config failed, using defaults: {err:#}");
            AgentPersistedConfig::default()
        });

        let hub_host = env_non_empty(HUB_HOST_ENV)
            .or_else(|| persisted.hub_host.clone())
            .map(|raw| {
                validate_hub_host(&raw).with_context(|| format!("invalid hub host: {raw}"))
            })
            .transpose()?;

        let device_id = env_non_empty(DEVICE_ID_ENV)
            .or_else(|| persisted.device_id.clone())
            .map(|raw| {
                validate_device_id(&raw).with_context(|| format!("invalid device id: {raw}"))
            })
            .transpose()?;

        let ttl_sec = u64_from_env(TTL_ENV)
            .or(persisted.ttl_sec.filter(|value| *value > 0))
            .unwrap_or(DEFAULT_TTL_SEC);

        let store_path = env_non_empty(STORE_PATH_ENV)
            .or_else(|| persisted.store_path.clone())
            .map(PathBuf::from)
            .unwrap_or_else(default_store_path);

        Ok(Self {
            hub_host,
            device_id,
            ttl_sec,
            store_path,
            assume_unsynced: bool_from_env(ASSUME_UNSYNCED_ENV, false),
        })
    }

    /// 返回 `(hub, device)`；任一缺失时提示先执行 `configure`。
    pub(crate) fn require_identity(&self) -> anyhow::Result<(&str, &str)> {
        match (self.hub_host.as_deref(), self.device_id.as_deref()) {
            (Some(hub), Some(device)) => Ok((hub, device)),
            (None, _) => Err(anyhow!(
                "hub host not configured; set {HUB_HOST_ENV} or run `iotauth-agent configure --hub <host> --device <id>`"
            )),
            (_, None) => Err(anyhow!(
                "device id not configured; set {DEVICE_ID_ENV} or run `iotauth-agent configure --hub <host> --device <id>`"
            )),
        }
    }
}

/// 读取 agent 持久化配置；文件不存在时返回默认值。
pub(crate) fn load_agent_persisted_config() -> anyhow::Result<AgentPersistedConfig> {
    let Some(path) = agent_config_file_path() else {
        return Ok(AgentPersistedConfig::default());
    };
    load_agent_persisted_config_from(&path)
}

/// 从指定路径读取持久化配置。
fn load_agent_persisted_config_from(path: &Path) -> anyhow::Result<AgentPersistedConfig> {
    if !path.exists() {
        return Ok(AgentPersistedConfig::default());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read agent config failed: {}", path.display()))?;
    let mut parsed: AgentPersistedConfig = serde_json::from_str(&raw)
        .with_context(|| format!("decode agent config failed: {}", path.display()))?;
    if parsed.version == 0 {
        parsed.version = AGENT_CONFIG_VERSION;
    }
    Ok(parsed)
}

/// 持久化 agent 配置，返回写入路径。
pub(crate) fn save_agent_persisted_config(
    config: &AgentPersistedConfig,
) -> anyhow::Result<PathBuf> {
    let Some(path) = agent_config_file_path() else {
        return Err(anyhow!("HOME not set, cannot persist agent config"));
    };
    save_agent_persisted_config_to(&path, config)?;
    Ok(path)
}

/// 将配置写到指定路径。
fn save_agent_persisted_config_to(
    path: &Path,
    config: &AgentPersistedConfig,
) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| {
            format!("create agent config directory failed: {}", parent.display())
        })?;
    }
    let payload = serde_json::to_string_pretty(config).context("encode agent config failed")?;
    fs::write(path, format!("{payload}\n"))
        .with_context(|| format!("write agent config failed: {}", path.display()))?;
    Ok(())
}

/// 配置文件路径：优先 `IOTAUTH_CONFIG_PATH`，否则 `~/.config/iotauth/agent/config.json`。
pub(crate) fn agent_config_file_path() -> Option<PathBuf> {
    if let Some(path) = env_non_empty(CONFIG_PATH_ENV) {
        return Some(PathBuf::from(path));
    }
    agent_home_dir().map(|dir| dir.join("config.json"))
}

/// 默认凭证文件路径；HOME 缺失时落在当前目录。
fn default_store_path() -> PathBuf {
    agent_home_dir()
        .map(|dir| dir.join("credentials.json"))
        .unwrap_or_else(|| PathBuf::from("credentials.json"))
}

/// `~/.config/iotauth/agent`。
fn agent_home_dir() -> Option<PathBuf> {
    let home = std::env::var("HOME").ok()?;
    if home.trim().is_empty() {
        return None;
    }
    Some(
        Path::new(&home)
            .join(".config")
            .join("iotauth")
            .join("agent"),
    )
}

/// 校验并规范化 IoT Hub 主机名：仅接受域名或 IPv4，不带端口与路径。
pub(crate) fn validate_hub_host(raw: &str) -> anyhow::Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("hub host cannot be empty"));
    }
    match Host::parse(trimmed).context("parse hub host failed")? {
        Host::Domain(domain) => {
            if domain.contains('/') || domain.starts_with('.') || domain.ends_with('.') {
                return Err(anyhow!("hub host is not a valid dns name: {domain}"));
            }
            Ok(domain)
        }
        Host::Ipv4(addr) => Ok(addr.to_string()),
        Host::Ipv6(_) => Err(anyhow!("ipv6 hub host is not supported")),
    }
}

/// 校验设备 ID：非空、长度受限、字符集与 IoT Hub 规则一致。
pub(crate) fn validate_device_id(raw: &str) -> anyhow::Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("device id cannot be empty"));
    }
    if trimmed.len() > MAX_DEVICE_ID_LEN {
        return Err(anyhow!(
            "device id too long: {} chars, max {MAX_DEVICE_ID_LEN}",
            trimmed.len()
        ));
    }
    if let Some(bad) = trimmed
        .chars()
        .find(|ch| !ch.is_ascii_alphanumeric() && !DEVICE_ID_SYMBOLS.contains(*ch))
    {
        return Err(anyhow!("device id contains unsupported character: {bad:?}"));
    }
    Ok(trimmed.to_string())
}

/// 校验 token 有效期，必须大于 0。
pub(crate) fn validate_ttl(raw: &str) -> anyhow::Result<u64> {
    let value = raw
        .trim()
        .parse::<u64>()
        .with_context(|| format!("ttl must be an integer number of seconds: {raw}"))?;
    if value == 0 {
        return Err(anyhow!("ttl must be greater than 0"));
    }
    Ok(value)
}

/// 读取非空环境变量（去首尾空白）。
fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// 读取正整数环境变量，非法值视为未设置。
fn u64_from_env(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
}

/// 解析布尔环境变量，支持常见 true/false 文本。
fn bool_from_env(key: &str, fallback: bool) -> bool {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "y" | "on" => true,
            "0" | "false" | "no" | "n" | "off" => false,
            _ => fallback,
        },
        Err(_) => fallback,
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{
        AgentConfig, AgentPersistedConfig, load_agent_persisted_config_from,
        save_agent_persisted_config_to, validate_device_id, validate_hub_host, validate_ttl,
    };

    fn make_temp_dir(prefix: &str) -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!(
            "iotauth_agent_config_test_{prefix}_{}_{}",
            std::process::id(),
            uuid::Uuid::new_v4()
        ));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    #[test]
    fn hub_host_is_normalized_to_lowercase_domain() {
        assert_eq!(
            validate_hub_host(" MyHub.Azure-Devices.net ").expect("valid host"),
            "myhub.azure-devices.net"
        );
        assert_eq!(validate_hub_host("10.0.0.8").expect("ipv4"), "10.0.0.8");
    }

    #[test]
    fn hub_host_rejects_paths_ports_and_ipv6() {
        for raw in [
            "",
            "myhub.azure-devices.net/devices",
            "myhub.azure-devices.net:8883",
            "[::1]",
            "my hub",
        ] {
            assert!(validate_hub_host(raw).is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn device_id_follows_hub_character_rules() {
        assert_eq!(validate_device_id(" dev-1.a_b ").expect("valid"), "dev-1.a_b");
        assert!(validate_device_id("").is_err());
        assert!(validate_device_id("dev/1").is_err());
        assert!(validate_device_id("dev 1").is_err());
        assert!(validate_device_id(&"d".repeat(129)).is_err());
        assert!(validate_device_id(&"d".repeat(128)).is_ok());
    }

    #[test]
    fn ttl_must_be_positive_integer() {
        assert_eq!(validate_ttl("3600").expect("ttl"), 3600);
        assert!(validate_ttl("0").is_err());
        assert!(validate_ttl("-1").is_err());
        assert!(validate_ttl("1h").is_err());
    }

    #[test]
    fn persisted_config_round_trips_with_camel_case_keys() {
        let dir = make_temp_dir("persist");
        let path = dir.join("agent").join("config.json");
        let config = AgentPersistedConfig {
            hub_host: Some("myhub.azure-devices.net".to_string()),
            device_id: Some("dev1".to_string()),
            ttl_sec: Some(900),
            ..AgentPersistedConfig::default()
        };
        save_agent_persisted_config_to(&path, &config).expect("save");

        let raw = std::fs::read_to_string(&path).expect("read");
        assert!(raw.contains("\"hubHost\""));
        assert!(raw.contains("\"ttlSec\": 900"));

        let loaded = load_agent_persisted_config_from(&path).expect("load");
        assert_eq!(loaded.hub_host.as_deref(), Some("myhub.azure-devices.net"));
        assert_eq!(loaded.device_id.as_deref(), Some("dev1"));
        assert_eq!(loaded.ttl_sec, Some(900));
        assert_eq!(loaded.version, 1);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn missing_config_file_yields_defaults() {
        let dir = make_temp_dir("missing");
        let loaded = load_agent_persisted_config_from(&dir.join("absent.json")).expect("load");
        assert!(loaded.hub_host.is_none());
        assert_eq!(loaded.version, 1);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn require_identity_reports_missing_parts() {
        let mut config = AgentConfig {
            hub_host: None,
            device_id: Some("dev1".to_string()),
            ttl_sec: 3600,
            store_path: PathBuf::from("credentials.json"),
            assume_unsynced: false,
        };
        let err = config.require_identity().expect_err("hub missing");
        assert!(err.to_string().contains("hub host not configured"));

        config.hub_host = Some("myhub.azure-devices.net".to_string());
        let (hub, device) = config.require_identity().expect("identity");
        assert_eq!((hub, device), ("myhub.azure-devices.net", "dev1"));
    }
}
