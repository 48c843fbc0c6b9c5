//! 编码工具：有界 base64 与 RFC3986 百分号编码。

use base64::{Engine as _, engine::general_purpose::STANDARD};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC};

use crate::error::AuthError;

/// 解码后密钥字节上限，与设备侧静态缓冲区一致。
pub const MAX_KEY_LEN: usize = 128;
/// `MAX_KEY_LEN` 字节对应的最长 base64 文本（含 padding）。
pub const MAX_ENCODED_KEY_LEN: usize = MAX_KEY_LEN.div_ceil(3) * 4;

/// RFC3986 unreserved 字符之外一律转义。
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// 解码标准 base64；非法输入或超过 `MAX_KEY_LEN` 时返回编码错误。
pub fn base64_decode(text: &str) -> Result<Vec<u8>, AuthError> {
    if text.len() > MAX_ENCODED_KEY_LEN {
        return Err(AuthError::encoding(format!(
            "base64 input too long: {} chars, max {MAX_ENCODED_KEY_LEN}",
            text.len()
        )));
    }
    let decoded = STANDARD
        .decode(text.as_bytes())
        .map_err(|err| AuthError::encoding(format!("base64 decode failed: {err}")))?;
    if decoded.len() > MAX_KEY_LEN {
        return Err(AuthError::encoding(format!(
            "decoded key too long: {} bytes, max {MAX_KEY_LEN}",
            decoded.len()
        )));
    }
    Ok(decoded)
}

/// 编码为标准 base64（含 padding）。
pub fn base64_encode(bytes: impl AsRef<[u8]>) -> String {
    STANDARD.encode(bytes)
}

/// 逐字节百分号编码，十六进制大写。
pub fn percent_encode(input: impl AsRef<[u8]>) -> String {
    percent_encoding::percent_encode(input.as_ref(), UNRESERVED).to_string()
}

/// `percent_encode` 的逆运算，按字节还原。
pub fn percent_decode(text: &str) -> Vec<u8> {
    percent_encoding::percent_decode_str(text).collect()
}
