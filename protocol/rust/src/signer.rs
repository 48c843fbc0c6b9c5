//! HMAC-SHA256 签名。

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{
    codec::{base64_decode, base64_encode},
    error::AuthError,
};

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 摘要长度。
pub const DIGEST_LEN: usize = 32;

/// 已解码的设备密钥字节；不实现 `Display`，`Debug` 只输出长度。
pub struct DeviceKey(Vec<u8>);

impl DeviceKey {
    /// 从 base64 文本解码；解码失败时不产生任何部分密钥。
    pub fn from_base64(secret_b64: &str) -> Result<Self, AuthError> {
        base64_decode(secret_b64).map(Self)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 空密钥不参与签名。
    fn mac(&self) -> Result<HmacSha256, AuthError> {
        if self.0.is_empty() {
            return Err(AuthError::credential("device key is empty"));
        }
        HmacSha256::new_from_slice(&self.0)
            .map_err(|_| AuthError::encoding("hmac key rejected"))
    }
}

impl fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceKey(<redacted {} bytes>)", self.0.len())
    }
}

/// 解码 base64 密钥后签名，输出 base64 摘要。
pub fn sign(secret_b64: &str, message: &str) -> Result<String, AuthError> {
    let key = DeviceKey::from_base64(secret_b64)?;
    sign_with_key(&key, message)
}

/// 使用已解码密钥签名。
pub fn sign_with_key(key: &DeviceKey, message: &str) -> Result<String, AuthError> {
    let mut mac = key.mac()?;
    mac.update(message.as_bytes());
    let digest = mac.finalize().into_bytes();
    Ok(base64_encode(digest))
}

/// 常量时间校验签名；签名格式错误视为不匹配。
pub fn verify(secret_b64: &str, message: &str, signature_b64: &str) -> Result<bool, AuthError> {
    let key = DeviceKey::from_base64(secret_b64)?;
    let Ok(expected) = base64_decode(signature_b64) else {
        return Ok(false);
    };
    if expected.len() != DIGEST_LEN {
        return Ok(false);
    }
    let mut mac = key.mac()?;
    mac.update(message.as_bytes());
    Ok(mac.verify_slice(&expected).is_ok())
}
