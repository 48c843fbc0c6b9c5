//! SAS 生成链路的统一错误定义。

use std::fmt;

/// 错误类别，便于调用方与测试按类别断言。
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AuthErrorKind {
    Encoding,
    Credential,
    Storage,
}

/// 鉴权错误。
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum AuthError {
    /// base64 非法或超出密钥长度上限。
    Encoding(String),
    /// 签名时缺少密钥或密钥为空。
    Credential(String),
    /// 持久化存储无法打开或读写失败。
    Storage(String),
}

impl AuthError {
    pub fn encoding(message: impl Into<String>) -> Self {
        Self::Encoding(message.into())
    }

    pub fn credential(message: impl Into<String>) -> Self {
        Self::Credential(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// 返回错误类别。
    pub fn kind(&self) -> AuthErrorKind {
        match self {
            Self::Encoding(_) => AuthErrorKind::Encoding,
            Self::Credential(_) => AuthErrorKind::Credential,
            Self::Storage(_) => AuthErrorKind::Storage,
        }
    }

    /// 返回错误描述（不含类别前缀）。
    pub fn message(&self) -> &str {
        match self {
            Self::Encoding(message) | Self::Credential(message) | Self::Storage(message) => {
                message
            }
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.kind() {
            AuthErrorKind::Encoding => "encoding error",
            AuthErrorKind::Credential => "credential error",
            AuthErrorKind::Storage => "storage error",
        };
        write!(f, "{label}: {}", self.message())
    }
}

impl std::error::Error for AuthError {}

#[cfg(test)]
mod tests {
    use super::{AuthError, AuthErrorKind};

    #[test]
    fn display_prefixes_kind_label() {
        let err = AuthError::storage("open namespace azure-iot failed");
        assert_eq!(err.kind(), AuthErrorKind::Storage);
        assert_eq!(
            err.to_string(),
            "storage error: open namespace azure-iot failed"
        );
    }
}
