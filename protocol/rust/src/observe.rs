//! 可观测性出口：鉴权流程只产出结构化事件，由注入的观察者决定去向。

use tracing::{debug, info, warn};

use crate::{clock::SyncStatus, error::AuthError};

/// 鉴权流程事件。字段中不允许出现密钥内容。
#[derive(Debug, Clone, Copy)]
pub enum AuthEvent<'a> {
    /// 新密钥已写入存储。
    CredentialStored { namespace: &'a str },
    /// 初始化时存储中没有密钥。
    CredentialMissing { namespace: &'a str },
    /// 初始化完成。
    Initialized { resource_uri: &'a str },
    /// 存储中的凭证已清空。
    CredentialsCleared { namespace: &'a str },
    /// 生成了新 token。
    TokenGenerated {
        resource_uri: &'a str,
        expiry: u64,
        clock: SyncStatus,
    },
    /// token 生成失败。
    TokenFailed {
        resource_uri: &'a str,
        error: &'a AuthError,
    },
}

/// 结构化事件接收方。
pub trait AuthObserver {
    fn on_event(&self, event: &AuthEvent<'_>);
}

/// 默认观察者：转发为 `tracing` 事件。
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl AuthObserver for TracingObserver {
    fn on_event(&self, event: &AuthEvent<'_>) {
        match *event {
            AuthEvent::CredentialStored { namespace } => {
                info!(namespace, "device key saved; no reflash needed after power loss");
            }
            AuthEvent::CredentialMissing { namespace } => {
                warn!(namespace, "no device key found; provide key on first run");
            }
            AuthEvent::Initialized { resource_uri } => {
                info!(resource = resource_uri, "iot auth initialized");
            }
            AuthEvent::CredentialsCleared { namespace } => {
                info!(namespace, "stored credentials cleared");
            }
            AuthEvent::TokenGenerated {
                resource_uri,
                expiry,
                clock,
            } => {
                if clock == SyncStatus::Unsynchronized {
                    warn!(
                        resource = resource_uri,
                        expiry,
                        "clock not synchronized; token expiry uses fallback epoch"
                    );
                }
                debug!(
                    resource = resource_uri,
                    expiry,
                    clock = clock.as_str(),
                    "generated fresh sas token"
                );
            }
            AuthEvent::TokenFailed {
                resource_uri,
                error,
            } => {
                warn!(
                    resource = resource_uri,
                    kind = ?error.kind(),
                    "sas token generation failed: {error}"
                );
            }
        }
    }
}

impl<O: AuthObserver + ?Sized> AuthObserver for &O {
    fn on_event(&self, event: &AuthEvent<'_>) {
        (**self).on_event(event);
    }
}
