//! 凭证存储模块职责：
//! 1. 定义最小化的命名空间 KV 存储能力（get/put/clear）。
//! 2. 以作用域会话方式打开/关闭命名空间，打开失败直接上报。
//! 3. 在固定命名空间/键下读写设备密钥。

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use crate::error::AuthError;

/// 凭证命名空间。
pub const CREDENTIAL_NAMESPACE: &str = "azure-iot";
/// 设备密钥键名。
pub const DEVICE_KEY_NAME: &str = "deviceKey";

/// 底层持久化 KV 引擎。调用方保证 `open` 成功后才会读写，结束时调用 `close`。
pub trait KvBackend {
    fn open(&mut self, namespace: &str) -> Result<(), AuthError>;
    fn get(&self, key: &str) -> Result<Option<String>, AuthError>;
    fn put(&mut self, key: &str, value: &str) -> Result<(), AuthError>;
    /// 清空当前命名空间。
    fn clear(&mut self) -> Result<(), AuthError>;
    fn close(&mut self);
}

/// 打开中的命名空间会话，析构时自动关闭。
struct StoreSession<'a, B: KvBackend> {
    backend: &'a mut B,
}

impl<B: KvBackend> Drop for StoreSession<'_, B> {
    fn drop(&mut self) {
        self.backend.close();
    }
}

/// 设备密钥存储。
#[derive(Debug)]
pub struct CredentialStore<B> {
    backend: B,
    namespace: String,
}

impl<B: KvBackend> CredentialStore<B> {
    pub fn new(backend: B) -> Self {
        Self::with_namespace(backend, CREDENTIAL_NAMESPACE)
    }

    pub fn with_namespace(backend: B, namespace: impl Into<String>) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
        }
    }

    fn session(&mut self) -> Result<StoreSession<'_, B>, AuthError> {
        self.backend.open(&self.namespace)?;
        Ok(StoreSession {
            backend: &mut self.backend,
        })
    }

    /// 写入密钥，覆盖旧值。
    pub fn store(&mut self, secret: &str) -> Result<(), AuthError> {
        let session = self.session()?;
        session.backend.put(DEVICE_KEY_NAME, secret)
    }

    /// 读取密钥；不存在时返回空串。
    pub fn retrieve(&mut self) -> Result<String, AuthError> {
        let session = self.session()?;
        Ok(session.backend.get(DEVICE_KEY_NAME)?.unwrap_or_default())
    }

    /// 删除命名空间下的全部内容。
    pub fn clear(&mut self) -> Result<(), AuthError> {
        let session = self.session()?;
        session.backend.clear()
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

/// 进程内存 KV，重启即失；`unavailable()` 用于模拟存储介质故障。
#[derive(Debug, Default)]
pub struct MemoryBackend {
    namespaces: HashMap<String, HashMap<String, String>>,
    current: Option<String>,
    unavailable: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 构造一个始终打开失败的存储。
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    /// 当前是否有打开中的命名空间。
    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    fn current(&self) -> Result<&str, AuthError> {
        self.current
            .as_deref()
            .ok_or_else(|| AuthError::storage("namespace not open"))
    }
}

impl KvBackend for MemoryBackend {
    fn open(&mut self, namespace: &str) -> Result<(), AuthError> {
        if self.unavailable {
            return Err(AuthError::storage(format!(
                "open namespace {namespace} failed: medium unavailable"
            )));
        }
        self.current = Some(namespace.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, AuthError> {
        let namespace = self.current()?;
        Ok(self
            .namespaces
            .get(namespace)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    fn put(&mut self, key: &str, value: &str) -> Result<(), AuthError> {
        let namespace = self.current()?.to_string();
        self.namespaces
            .entry(namespace)
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn clear(&mut self) -> Result<(), AuthError> {
        let namespace = self.current()?.to_string();
        self.namespaces.remove(&namespace);
        Ok(())
    }

    fn close(&mut self) {
        self.current = None;
    }
}

/// 落盘文档：`{ "<namespace>": { "<key>": "<value>" } }`。
type FileDocument = BTreeMap<String, BTreeMap<String, String>>;

/// JSON 文件 KV，写入走临时文件 + rename，断电不留半截文件。
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    /// 打开期间缓存的整份文档与命名空间。
    opened: Option<(String, FileDocument)>,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            opened: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<FileDocument, AuthError> {
        // 仅“文件不存在”视为空库；其余读失败都要上报。
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(FileDocument::new()),
            Err(err) => {
                return Err(AuthError::storage(format!(
                    "read credential store failed: {}: {err}",
                    self.path.display()
                )));
            }
        };
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(FileDocument::new());
        }
        serde_json::from_slice(&raw).map_err(|err| {
            AuthError::storage(format!(
                "decode credential store failed: {}: {err}",
                self.path.display()
            ))
        })
    }

    fn persist(&self, document: &FileDocument) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|err| {
                AuthError::storage(format!(
                    "create credential store dir failed: {}: {err}",
                    parent.display()
                ))
            })?;
        }
        let encoded = serde_json::to_vec_pretty(document)
            .map_err(|err| AuthError::storage(format!("encode credential store failed: {err}")))?;

        let tmp_path = self
            .path
            .with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        write_synced(&tmp_path, &encoded).map_err(|err| {
            let _ = fs::remove_file(&tmp_path);
            AuthError::storage(format!(
                "write credential store failed: {}: {err}",
                tmp_path.display()
            ))
        })?;
        fs::rename(&tmp_path, &self.path).map_err(|err| {
            let _ = fs::remove_file(&tmp_path);
            AuthError::storage(format!(
                "finalize credential store failed: {}: {err}",
                self.path.display()
            ))
        })?;
        sync_parent_dir(&self.path).map_err(|err| {
            AuthError::storage(format!(
                "sync credential store dir failed: {}: {err}",
                self.path.display()
            ))
        })
    }
}

/// 写文件并刷盘。
fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// rename 之后刷新父目录项，保证改名本身落盘。
#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::File::open(parent)?.sync_all()
}

/// 非 unix 平台无法以文件句柄打开目录，rename 由文件系统保证。
#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

impl KvBackend for FileBackend {
    fn open(&mut self, namespace: &str) -> Result<(), AuthError> {
        let document = self.load()?;
        self.opened = Some((namespace.to_string(), document));
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, AuthError> {
        let (namespace, document) = self
            .opened
            .as_ref()
            .ok_or_else(|| AuthError::storage("namespace not open"))?;
        Ok(document
            .get(namespace)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    fn put(&mut self, key: &str, value: &str) -> Result<(), AuthError> {
        let Some((namespace, document)) = self.opened.as_mut() else {
            return Err(AuthError::storage("namespace not open"));
        };
        document
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        let snapshot = document.clone();
        self.persist(&snapshot)
    }

    fn clear(&mut self) -> Result<(), AuthError> {
        let Some((namespace, document)) = self.opened.as_mut() else {
            return Err(AuthError::storage("namespace not open"));
        };
        if document.remove(namespace.as_str()).is_none() {
            return Ok(());
        }
        let snapshot = document.clone();
        self.persist(&snapshot)
    }

    fn close(&mut self) {
        self.opened = None;
    }
}
