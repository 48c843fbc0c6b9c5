// 文件职责：
// 1) 设备侧 SAS token 生成链路：签名输入规范化、HMAC-SHA256、base64/URL 编码。
// 2) 可降级时钟（未校时回退到固定纪元 + 开机时长）与密钥持久化契约。
// 3) 作为 Rust 侧唯一实现，供 agent 与其他宿主复用。

pub mod auth;
pub mod clock;
pub mod codec;
pub mod error;
pub mod observe;
pub mod signer;
pub mod store;
pub mod token;

pub use auth::AzureIotAuth;
pub use clock::{
    ClockBackend, ClockReading, ClockSource, FALLBACK_EPOCH_SEC, ManualClock, SyncStatus,
    SystemClock,
};
pub use error::{AuthError, AuthErrorKind};
pub use observe::{AuthEvent, AuthObserver, TracingObserver};
pub use store::{
    CREDENTIAL_NAMESPACE, CredentialStore, DEVICE_KEY_NAME, FileBackend, KvBackend, MemoryBackend,
};
pub use token::{DEFAULT_TTL_SEC, DeviceIdentity, SasToken, Secret, TokenBuilder};
