//! `inspect`：解析 SAS token，展示资源、过期时间与剩余有效期，可选用本机密钥复核签名。

use anyhow::{Context, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use iotauth_sas::{ClockReading, ClockSource, SasToken, signer};
use serde_json::json;

use super::{
    OutputFormat,
    credentials::{stored_key, system_clock},
};
use crate::config::AgentConfig;

/// 解析并打印 token；已过期或签名不匹配时返回错误。
pub(super) fn execute(raw: &str, format: OutputFormat, verify: bool) -> anyhow::Result<()> {
    let token = raw.parse::<SasToken>().context("parse sas token failed")?;
    let cfg = AgentConfig::from_env()?;
    let now = current_reading(&cfg).unix_secs();

    let signature_ok = if verify {
        let key = stored_key(&cfg)?.with_context(|| {
            format!(
                "no device key stored in {}, cannot verify",
                cfg.store_path.display()
            )
        })?;
        Some(signer::verify(
            &key,
            &token.string_to_sign(),
            token.signature(),
        )?)
    } else {
        None
    };

    println!("{}", render(&token, now, signature_ok, format)?);

    if signature_ok == Some(false) {
        return Err(anyhow!("token signature does not match stored device key"));
    }
    if token.is_expired_at(now) {
        return Err(anyhow!("token expired at {}", format_unix(token.expiry())));
    }
    Ok(())
}

/// 过期判断使用与生成 token 相同的时钟。
fn current_reading(cfg: &AgentConfig) -> ClockReading {
    ClockSource::new(system_clock(cfg)).reading()
}

/// 渲染检查结果。
fn render(
    token: &SasToken,
    now: u64,
    signature_ok: Option<bool>,
    format: OutputFormat,
) -> anyhow::Result<String> {
    let status = if token.is_expired_at(now) {
        "expired"
    } else {
        "valid"
    };
    let signature = signature_ok.map(|ok| if ok { "match" } else { "mismatch" });

    match format {
        OutputFormat::Text => {
            let mut lines = vec![
                format!("resource: {}", token.resource_uri()),
                format!(
                    "expiry: {} ({})",
                    token.expiry(),
                    format_unix(token.expiry())
                ),
                format!("remaining-sec: {}", token.remaining_at(now)),
                format!("status: {status}"),
            ];
            if let Some(signature) = signature {
                lines.push(format!("signature: {signature}"));
            }
            Ok(lines.join("\n"))
        }
        OutputFormat::Json => {
            let payload = json!({
                "resourceUri": token.resource_uri(),
                "expiry": token.expiry(),
                "expiryAt": format_unix(token.expiry()),
                "remainingSec": token.remaining_at(now),
                "status": status,
                "signature": signature,
            });
            serde_json::to_string_pretty(&payload).context("encode inspect json failed")
        }
    }
}

/// unix 秒转 RFC3339（UTC）。
pub(super) fn format_unix(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| "out-of-range".to_string())
}
