//! 设备侧鉴权入口：初始化凭证、生成 token、清除凭证。

use crate::{
    clock::{ClockBackend, ClockSource},
    error::AuthError,
    observe::{AuthEvent, AuthObserver, TracingObserver},
    signer::DeviceKey,
    store::{CredentialStore, KvBackend},
    token::{DEFAULT_TTL_SEC, DeviceIdentity, SasToken, Secret, TokenBuilder},
};

/// 设备鉴权上下文。存储、时钟与观察者均显式注入，无全局状态。
pub struct AzureIotAuth<B, C, O = TracingObserver> {
    store: CredentialStore<B>,
    clock: ClockSource<C>,
    observer: O,
    identity: Option<DeviceIdentity>,
    secret: Secret,
}

impl<B: KvBackend, C: ClockBackend> AzureIotAuth<B, C, TracingObserver> {
    /// 使用 tracing 作为事件出口。
    pub fn new(backend: B, clock: C) -> Self {
        Self::with_observer(backend, clock, TracingObserver)
    }
}

impl<B: KvBackend, C: ClockBackend, O: AuthObserver> AzureIotAuth<B, C, O> {
    pub fn with_observer(backend: B, clock: C, observer: O) -> Self {
        Self {
            store: CredentialStore::new(backend),
            clock: ClockSource::new(clock),
            observer,
            identity: None,
            secret: Secret::default(),
        }
    }

    /// 初始化身份与凭证。
    ///
    /// 传入非空 `key` 时先校验可解码再覆盖写入存储，随后一律从存储回读。
    /// 存储中无密钥返回 `Ok(false)`；存储打不开、密钥格式非法返回错误。
    pub fn begin(
        &mut self,
        hub_host: &str,
        device_id: &str,
        key: Option<&str>,
    ) -> Result<bool, AuthError> {
        let identity = DeviceIdentity::new(hub_host, device_id);
        self.secret = Secret::default();

        if let Some(key) = key.filter(|value| !value.is_empty()) {
            DeviceKey::from_base64(key)?;
            self.store.store(key)?;
            self.observer.on_event(&AuthEvent::CredentialStored {
                namespace: self.store.namespace(),
            });
        }

        let stored = self.store.retrieve()?;
        let resource_uri = identity.resource_uri();
        self.identity = Some(identity);
        if stored.is_empty() {
            self.observer.on_event(&AuthEvent::CredentialMissing {
                namespace: self.store.namespace(),
            });
            return Ok(false);
        }

        DeviceKey::from_base64(&stored)?;
        self.secret = Secret::new(stored);
        self.observer.on_event(&AuthEvent::Initialized {
            resource_uri: &resource_uri,
        });
        Ok(true)
    }

    /// 生成结构化 token。
    pub fn generate_sas_token(&self, ttl_sec: u64) -> Result<SasToken, AuthError> {
        let identity = self
            .identity
            .as_ref()
            .ok_or_else(|| AuthError::credential("not initialized; call begin first"))?;
        TokenBuilder::new(&self.clock, &self.observer).generate_token(
            identity,
            &self.secret,
            ttl_sec,
        )
    }

    /// 生成线格式 token 字符串。
    pub fn generate_token(&self, ttl_sec: u64) -> Result<String, AuthError> {
        self.generate_sas_token(ttl_sec).map(|token| token.to_string())
    }

    /// 以默认有效期生成 token。
    pub fn generate_default_token(&self) -> Result<String, AuthError> {
        self.generate_token(DEFAULT_TTL_SEC)
    }

    /// 清除持久化密钥，同时丢弃内存中的副本。
    pub fn clear_credentials(&mut self) -> Result<(), AuthError> {
        self.store.clear()?;
        self.secret = Secret::default();
        self.observer.on_event(&AuthEvent::CredentialsCleared {
            namespace: self.store.namespace(),
        });
        Ok(())
    }

    /// 是否已有可用密钥。
    pub fn is_ready(&self) -> bool {
        self.identity.is_some() && !self.secret.is_empty()
    }

    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.identity.as_ref()
    }

    pub fn clock(&self) -> &ClockSource<C> {
        &self.clock
    }

    pub fn store(&self) -> &CredentialStore<B> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        clock::{FALLBACK_EPOCH_SEC, ManualClock},
        error::AuthErrorKind,
        observe::testing::RecordingObserver,
        store::{FileBackend, KvBackend, MemoryBackend},
        token::SasToken,
    };

    use super::AzureIotAuth;

    const HUB: &str = "myhub.azure-devices.net";
    const KEY: &str = "c2VjcmV0a2V5";

    fn auth_at(now: u64) -> AzureIotAuth<MemoryBackend, ManualClock, RecordingObserver> {
        AzureIotAuth::with_observer(
            MemoryBackend::new(),
            ManualClock::synchronized(now),
            RecordingObserver::default(),
        )
    }

    #[test]
    fn begin_with_key_persists_and_generates_reference_token() {
        let mut auth = auth_at(1_700_000_000);
        assert!(auth.begin(HUB, "dev1", Some(KEY)).expect("begin"));
        assert!(auth.is_ready());

        let token = auth.generate_default_token().expect("token");
        assert_eq!(
            token,
            "SharedAccessSignature sr=myhub.azure-devices.net/devices/dev1\
             &sig=y37fXXOPKGfKRtcScIzJs50Aqr0%2FcMpdfzDN4wdLBuI%3D&se=1700003600"
        );
    }

    #[test]
    fn begin_without_key_reads_previously_stored_secret() {
        let mut backend = MemoryBackend::new();
        backend.open("azure-iot").expect("open");
        backend.put("deviceKey", KEY).expect("put");
        backend.close();

        let mut auth = AzureIotAuth::with_observer(
            backend,
            ManualClock::synchronized(1_700_000_000),
            RecordingObserver::default(),
        );
        assert!(auth.begin(HUB, "dev1", None).expect("begin"));
        assert!(auth.generate_token(60).expect("token").ends_with("&se=1700000060"));
    }

    #[test]
    fn clear_then_begin_without_key_returns_false() {
        let mut auth = auth_at(1_700_000_000);
        assert!(auth.begin(HUB, "dev1", Some(KEY)).expect("begin"));
        auth.clear_credentials().expect("clear");
        assert!(!auth.is_ready());

        assert!(!auth.begin(HUB, "dev1", None).expect("begin"));
        let err = auth.generate_default_token().expect_err("no secret");
        assert_eq!(err.kind(), AuthErrorKind::Credential);
    }

    #[test]
    fn empty_key_argument_counts_as_not_supplied() {
        let mut auth = auth_at(1_700_000_000);
        assert!(!auth.begin(HUB, "dev1", Some("")).expect("begin"));
    }

    #[test]
    fn generate_before_begin_is_a_credential_error() {
        let auth = auth_at(1_700_000_000);
        let err = auth.generate_token(3600).expect_err("not initialized");
        assert_eq!(err.kind(), AuthErrorKind::Credential);
    }

    #[test]
    fn malformed_key_fails_begin_and_is_not_persisted() {
        let mut auth = auth_at(1_700_000_000);
        let err = auth
            .begin(HUB, "dev1", Some("c2VjcmV0!2V5"))
            .expect_err("malformed key");
        assert_eq!(err.kind(), AuthErrorKind::Encoding);

        assert!(!auth.begin(HUB, "dev1", None).expect("begin"));
    }

    #[test]
    fn malformed_stored_key_fails_begin() {
        let mut backend = MemoryBackend::new();
        backend.open("azure-iot").expect("open");
        backend.put("deviceKey", "not*base64").expect("put");
        backend.close();

        let mut auth = AzureIotAuth::with_observer(
            backend,
            ManualClock::synchronized(1_700_000_000),
            RecordingObserver::default(),
        );
        let err = auth.begin(HUB, "dev1", None).expect_err("bad stored key");
        assert_eq!(err.kind(), AuthErrorKind::Encoding);
        assert!(!auth.is_ready());
    }

    #[test]
    fn storage_failure_is_surfaced_not_reported_as_missing() {
        let mut auth = AzureIotAuth::with_observer(
            MemoryBackend::unavailable(),
            ManualClock::synchronized(1_700_000_000),
            RecordingObserver::default(),
        );
        let err = auth.begin(HUB, "dev1", None).expect_err("storage down");
        assert_eq!(err.kind(), AuthErrorKind::Storage);
    }

    #[test]
    fn unreachable_file_store_fails_begin() {
        let mut dir = std::env::temp_dir();
        dir.push(format!(
            "iotauth_auth_test_blocked_{}_{}",
            std::process::id(),
            uuid::Uuid::new_v4()
        ));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        let blocker = dir.join("blocker");
        std::fs::write(&blocker, "plain file").expect("seed blocker");

        let mut auth = AzureIotAuth::with_observer(
            FileBackend::new(blocker.join("credentials.json")),
            ManualClock::synchronized(1_700_000_000),
            RecordingObserver::default(),
        );
        let err = auth.begin("h", "d", None).expect_err("store unreachable");
        assert_eq!(err.kind(), AuthErrorKind::Storage);
        assert!(auth.observer.events().is_empty());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn tokens_are_fresh_per_call() {
        let backend = ManualClock::synchronized(1_700_000_000);
        let mut auth = AzureIotAuth::with_observer(
            MemoryBackend::new(),
            &backend,
            RecordingObserver::default(),
        );
        assert!(auth.begin(HUB, "dev1", Some(KEY)).expect("begin"));

        let first = auth.generate_sas_token(3600).expect("token");
        backend.advance(10);
        let second = auth.generate_sas_token(3600).expect("token");
        assert_eq!(second.expiry(), first.expiry() + 10);
        assert_ne!(first.signature(), second.signature());
    }

    #[test]
    fn unsynchronized_device_still_generates_token() {
        let mut auth = AzureIotAuth::with_observer(
            MemoryBackend::new(),
            ManualClock::unsynchronized(5),
            RecordingObserver::default(),
        );
        assert!(auth.begin(HUB, "dev1", Some(KEY)).expect("begin"));
        let token = auth
            .generate_token(3600)
            .expect("token")
            .parse::<SasToken>()
            .expect("parse");
        assert_eq!(token.expiry(), FALLBACK_EPOCH_SEC + 5 + 3600);
    }

    #[test]
    fn lifecycle_events_are_reported_without_secret() {
        let mut auth = auth_at(1_700_000_000);
        auth.begin(HUB, "dev1", Some(KEY)).expect("begin");
        auth.generate_token(3600).expect("token");
        auth.clear_credentials().expect("clear");
        auth.begin(HUB, "dev1", None).expect("begin");

        let events = auth.observer.events();
        assert_eq!(
            events,
            vec![
                "stored:azure-iot".to_string(),
                "initialized:myhub.azure-devices.net/devices/dev1".to_string(),
                "token:1700003600:synchronized".to_string(),
                "cleared:azure-iot".to_string(),
                "missing:azure-iot".to_string(),
            ]
        );
        assert!(events.iter().all(|event| !event.contains(KEY)));
    }

    #[test]
    fn file_backed_credentials_survive_restart() {
        let mut dir = std::env::temp_dir();
        dir.push(format!(
            "iotauth_auth_test_restart_{}_{}",
            std::process::id(),
            uuid::Uuid::new_v4()
        ));
        let path = dir.join("credentials.json");

        let mut first = AzureIotAuth::new(
            FileBackend::new(&path),
            ManualClock::synchronized(1_700_000_000),
        );
        assert!(first.begin(HUB, "dev1", Some(KEY)).expect("begin"));
        drop(first);

        let mut rebooted = AzureIotAuth::new(
            FileBackend::new(&path),
            ManualClock::synchronized(1_700_000_000),
        );
        assert!(rebooted.begin(HUB, "dev1", None).expect("begin"));
        assert!(rebooted.generate_default_token().expect("token").contains("&se=1700003600"));
        let _ = std::fs::remove_dir_all(dir);
    }
}
