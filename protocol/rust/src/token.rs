//! SAS token 组装与解析。
//!
//! 线格式：`SharedAccessSignature sr=<resourceUri>&sig=<urlencoded b64 hmac>&se=<unix秒>`，
//! 签名输入为 `<resourceUri>\n<expiry>`。

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    clock::{ClockBackend, ClockSource},
    codec::{percent_decode, percent_encode},
    error::AuthError,
    observe::{AuthEvent, AuthObserver},
    signer::sign,
};

/// 默认有效期（秒）。
pub const DEFAULT_TTL_SEC: u64 = 3600;
/// token 前缀。
pub const SAS_SCHEME: &str = "SharedAccessSignature";

/// 设备身份，进程生命周期内不可变。
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
    hub_host: String,
    device_id: String,
}

impl DeviceIdentity {
    pub fn new(hub_host: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            hub_host: hub_host.into(),
            device_id: device_id.into(),
        }
    }

    pub fn hub_host(&self) -> &str {
        &self.hub_host
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// `<hub>/devices/<device>`。
    pub fn resource_uri(&self) -> String {
        format!("{}/devices/{}", self.hub_host, self.device_id)
    }
}

/// base64 形式的设备密钥；不可打印，`Debug` 输出已脱敏。
#[derive(Clone, Default, Eq, PartialEq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 仅供签名链路读取原文。
    pub(crate) fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("Secret(<empty>)")
        } else {
            f.write_str("Secret(<redacted>)")
        }
    }
}

/// 组装签名输入。
pub fn string_to_sign(resource_uri: &str, expiry: u64) -> String {
    format!("{resource_uri}\n{expiry}")
}

/// 已签名 token；每次生成都是新值，创建后不可修改。
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SasToken {
    resource_uri: String,
    expiry: u64,
    /// 原始 base64 签名（未 URL 编码）。
    signature: String,
}

impl SasToken {
    pub fn resource_uri(&self) -> &str {
        &self.resource_uri
    }

    /// 过期时间（unix 秒）。
    pub fn expiry(&self) -> u64 {
        self.expiry
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn is_expired_at(&self, now: u64) -> bool {
        self.expiry <= now
    }

    /// 剩余有效秒数，已过期为 0。
    pub fn remaining_at(&self, now: u64) -> u64 {
        self.expiry.saturating_sub(now)
    }

    /// 签名输入，便于校验方复算。
    pub fn string_to_sign(&self) -> String {
        string_to_sign(&self.resource_uri, self.expiry)
    }
}

impl fmt::Display for SasToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{SAS_SCHEME} sr={}&sig={}&se={}",
            self.resource_uri,
            percent_encode(&self.signature),
            self.expiry
        )
    }
}

impl FromStr for SasToken {
    type Err = AuthError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let body = raw
            .trim()
            .strip_prefix(SAS_SCHEME)
            .and_then(|rest| rest.strip_prefix(' '))
            .ok_or_else(|| AuthError::encoding(format!("token must start with `{SAS_SCHEME} `")))?;

        let mut resource_uri = None;
        let mut signature = None;
        let mut expiry = None;
        for pair in body.split('&') {
            let Some((name, value)) = pair.split_once('=') else {
                return Err(AuthError::encoding(format!("malformed token field: {pair}")));
            };
            match name {
                "sr" => set_once(&mut resource_uri, name, value.to_string())?,
                "sig" => {
                    let decoded = String::from_utf8(percent_decode(value))
                        .map_err(|_| AuthError::encoding("token signature is not utf-8"))?;
                    set_once(&mut signature, name, decoded)?;
                }
                "se" => {
                    let parsed = value
                        .parse::<u64>()
                        .map_err(|_| AuthError::encoding(format!("invalid token expiry: {value}")))?;
                    set_once(&mut expiry, name, parsed)?;
                }
                // skn 等策略字段与设备级 token 无关。
                _ => {}
            }
        }

        match (resource_uri, signature, expiry) {
            (Some(resource_uri), Some(signature), Some(expiry))
                if !resource_uri.is_empty() && !signature.is_empty() =>
            {
                Ok(Self {
                    resource_uri,
                    expiry,
                    signature,
                })
            }
            _ => Err(AuthError::encoding("token missing sr, sig or se")),
        }
    }
}

/// 字段只允许出现一次。
fn set_once<T>(slot: &mut Option<T>, name: &str, value: T) -> Result<(), AuthError> {
    if slot.is_some() {
        return Err(AuthError::encoding(format!("duplicate token field: {name}")));
    }
    *slot = Some(value);
    Ok(())
}

/// token 生成器：时钟与观察者由调用方注入。
pub struct TokenBuilder<'a, C, O> {
    clock: &'a ClockSource<C>,
    observer: &'a O,
}

impl<'a, C: ClockBackend, O: AuthObserver> TokenBuilder<'a, C, O> {
    pub fn new(clock: &'a ClockSource<C>, observer: &'a O) -> Self {
        Self { clock, observer }
    }

    /// 生成新 token；密钥为空时直接失败，不会用空密钥签名。
    pub fn generate_token(
        &self,
        identity: &DeviceIdentity,
        secret: &Secret,
        ttl_sec: u64,
    ) -> Result<SasToken, AuthError> {
        let resource_uri = identity.resource_uri();
        if secret.is_empty() {
            let err = AuthError::credential("device key is empty; call begin with a key first");
            self.observer.on_event(&AuthEvent::TokenFailed {
                resource_uri: &resource_uri,
                error: &err,
            });
            return Err(err);
        }

        let reading = self.clock.reading();
        let expiry = reading.unix_secs().saturating_add(ttl_sec);
        let signature = match sign(secret.expose(), &string_to_sign(&resource_uri, expiry)) {
            Ok(signature) => signature,
            Err(err) => {
                self.observer.on_event(&AuthEvent::TokenFailed {
                    resource_uri: &resource_uri,
                    error: &err,
                });
                return Err(err);
            }
        };

        self.observer.on_event(&AuthEvent::TokenGenerated {
            resource_uri: &resource_uri,
            expiry,
            clock: reading.status(),
        });
        Ok(SasToken {
            resource_uri,
            expiry,
            signature,
        })
    }
}
