//! 凭证相关命令：`token`、`provision`、`clear`，以及 doctor 用的凭证探测。

use anyhow::{Context, anyhow};
use iotauth_sas::{
    AzureIotAuth, ClockSource, CredentialStore, FileBackend, SyncStatus, SystemClock,
    signer::DeviceKey,
};
use tracing::{info, warn};

use crate::config::AgentConfig;

/// 通过环境变量提供密钥时使用的变量名。
const DEVICE_KEY_ENV: &str = "IOT_DEVICE_KEY";

type AgentAuth = AzureIotAuth<FileBackend, SystemClock>;

/// 按配置装配鉴权上下文。
fn open_auth(cfg: &AgentConfig) -> AgentAuth {
    AzureIotAuth::new(FileBackend::new(&cfg.store_path), system_clock(cfg))
}

/// 与 token 生成一致的系统时钟（尊重 `IOTAUTH_ASSUME_UNSYNCED`）。
pub(super) fn system_clock(cfg: &AgentConfig) -> SystemClock {
    SystemClock::new().force_unsynchronized(cfg.assume_unsynced)
}

/// 生成 token 并输出到 stdout。
pub(super) fn execute_token(ttl_sec: Option<u64>) -> anyhow::Result<()> {
    let cfg = AgentConfig::from_env()?;
    let (hub, device) = cfg.require_identity()?;
    let mut auth = open_auth(&cfg);

    let ready = auth
        .begin(hub, device, None)
        .context("initialize device credentials failed")?;
    if !ready {
        return Err(anyhow!(
            "no device key stored in {}; run `iotauth-agent provision <base64-key>` first",
            cfg.store_path.display()
        ));
    }
    if auth.clock().status() == SyncStatus::Unsynchronized {
        warn!("system clock not synchronized, expiry is derived from uptime");
    }

    let token = auth
        .generate_token(ttl_sec.unwrap_or(cfg.ttl_sec))
        .context("generate sas token failed")?;
    println!("{token}");
    Ok(())
}

/// 写入设备密钥；命令行参数优先，其次 `IOT_DEVICE_KEY`。
pub(super) fn execute_provision(key: Option<String>) -> anyhow::Result<()> {
    let key = key
        .or_else(|| std::env::var(DEVICE_KEY_ENV).ok())
        .map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty())
        .with_context(|| {
            format!("device key required: pass <base64-key> or set {DEVICE_KEY_ENV}")
        })?;

    let cfg = AgentConfig::from_env()?;
    let (hub, device) = cfg.require_identity()?;
    let mut auth = open_auth(&cfg);
    let ready = auth
        .begin(hub, device, Some(&key))
        .context("store device key failed")?;
    if !ready {
        return Err(anyhow!("device key was not persisted"));
    }

    info!(store = %cfg.store_path.display(), "device key provisioned");
    println!("device key stored: {}", cfg.store_path.display());
    Ok(())
}

/// 清除设备密钥；不要求 hub/device 已配置。
pub(super) fn execute_clear() -> anyhow::Result<()> {
    let cfg = AgentConfig::from_env()?;
    let mut auth = open_auth(&cfg);
    auth.clear_credentials().context("clear device credentials failed")?;
    println!("device key cleared: {}", cfg.store_path.display());
    Ok(())
}

/// 读取当前存储中的 base64 密钥；未存储时返回 `None`。
pub(super) fn stored_key(cfg: &AgentConfig) -> anyhow::Result<Option<String>> {
    let mut store = CredentialStore::new(FileBackend::new(&cfg.store_path));
    let stored = store.retrieve().context("read device credentials failed")?;
    Ok(Some(stored).filter(|value| !value.is_empty()))
}

/// doctor 诊断结果。
pub(super) struct DoctorReport {
    /// `present`、`absent`、`invalid` 或 `error: ...`。
    pub(super) credential: String,
    pub(super) clock_status: SyncStatus,
    pub(super) now: u64,
    /// 身份已配置且密钥可用。
    pub(super) ready: bool,
}

/// 探测凭证与时钟状态，不生成 token。
pub(super) fn diagnose(cfg: &AgentConfig) -> DoctorReport {
    let (credential, key_usable) = match stored_key(cfg) {
        Ok(None) => ("absent".to_string(), false),
        Ok(Some(key)) => match DeviceKey::from_base64(&key) {
            Ok(_) => ("present".to_string(), true),
            Err(err) => (format!("invalid: {err}"), false),
        },
        Err(err) => (format!("error: {err:#}"), false),
    };
    let clock = ClockSource::new(system_clock(cfg));
    let reading = clock.reading();

    DoctorReport {
        credential,
        clock_status: reading.status(),
        now: reading.unix_secs(),
        ready: key_usable && cfg.require_identity().is_ok(),
    }
}
