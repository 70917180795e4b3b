//! Session storage contract plus two small backends.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Mutex;

use crate::session::{Session, SessionRecord};

/// Where a [`Connector`](super::Connector) keeps its session.
///
/// `get` returns `Ok(None)` when nothing is stored yet. Implementations must
/// round-trip every field, the private key included.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self) -> Result<Option<Session>>;
    async fn set(&self, session: &Session) -> Result<()>;
}

/// In-process storage. Keeps the serialized record, not the live session.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    record: Mutex<Option<SessionRecord>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last persisted record, if any.
    pub fn record(&self) -> Option<SessionRecord> {
        self.record.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self) -> Result<Option<Session>> {
        self.record().map(Session::from_record).transpose().map_err(Into::into)
    }

    async fn set(&self, session: &Session) -> Result<()> {
        *self.record.lock().unwrap_or_else(|p| p.into_inner()) = Some(session.to_record());
        Ok(())
    }
}

#[cfg(feature = "file-store")]
pub use file::FileStorage;

#[cfg(feature = "file-store")]
mod file {
    use super::*;
    use anyhow::Context;
    use std::path::{Path, PathBuf};

    /// JSON file storage, written atomically via a temp file + rename.
    #[derive(Debug, Clone)]
    pub struct FileStorage {
        path: PathBuf,
    }

    impl FileStorage {
        pub fn new(path: impl Into<PathBuf>) -> Self {
            Self { path: path.into() }
        }

        /// `$TONCONNECT_SESSION`, or `<data dir>/tonconnect/session.json`.
        pub fn default_path() -> PathBuf {
            std::env::var("TONCONNECT_SESSION")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    dirs::data_local_dir()
                        .unwrap_or_else(|| PathBuf::from("."))
                        .join("tonconnect")
                        .join("session.json")
                })
        }

        pub fn path(&self) -> &Path {
            &self.path
        }
    }

    #[async_trait]
    impl Storage for FileStorage {
        async fn get(&self) -> Result<Option<Session>> {
            let raw = match tokio::fs::read_to_string(&self.path).await {
                Ok(raw) => raw,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e).with_context(|| format!("session read: {}", self.path.display())),
            };
            let session = serde_json::from_str(&raw)
                .with_context(|| format!("session json: {}", self.path.display()))?;
            Ok(Some(session))
        }

        async fn set(&self, session: &Session) -> Result<()> {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await.context("session mkdir")?;
            }
            let json = serde_json::to_string_pretty(session)?;
            let tmp = self.path.with_extension("json.tmp");
            tokio::fs::write(&tmp, json).await.context("session write")?;
            restrict_permissions(&tmp).await?;
            tokio::fs::rename(&tmp, &self.path).await.context("session rename")?;
            Ok(())
        }
    }

    #[cfg(unix)]
    async fn restrict_permissions(path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .context("session chmod")
    }

    #[cfg(not(unix))]
    async fn restrict_permissions(_path: &Path) -> Result<()> {
        Ok(())
    }
}
