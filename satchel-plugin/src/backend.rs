use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::file::RemoteFile;

/// Failure surfaced by a delegated backend operation. Backends can raise
/// anything that converts into `anyhow::Error`; the service wraps the
/// message and never lets the failure cross the process boundary raw.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct BackendError(#[from] anyhow::Error);

impl BackendError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self(anyhow::anyhow!(message.into()))
    }
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        Self(err.into())
    }
}

/// The operations a plugin author implements for one remote store.
///
/// Every fallible operation may fail with an arbitrary backend-specific
/// error; `authentication_needed`, `is_connected` and
/// `get_current_account` are plain queries and cannot fail.
#[async_trait]
pub trait PluginBackend: Send + Sync + 'static {
    /// Whether a login round-trip is required before `connect` can succeed.
    async fn authentication_needed(&self) -> bool;

    async fn connect(&self) -> Result<(), BackendError>;

    async fn disconnect(&self) -> Result<(), BackendError>;

    async fn is_connected(&self) -> bool;

    /// Resolve a remote file to a URL the host can open. Backends that
    /// cache content locally return a `file://` URL; the service watches
    /// that path for edits when asked to.
    async fn open_file(&self, file: &RemoteFile) -> Result<Url, BackendError>;

    /// Push local content at `source` to `dest`, returning the updated
    /// remote handle.
    async fn upload(&self, source: &Url, dest: &RemoteFile) -> Result<RemoteFile, BackendError>;

    /// Fetch `source` into `dest`, returning the URL actually written.
    async fn download(&self, source: &RemoteFile, dest: &Url) -> Result<Url, BackendError>;

    async fn list_files(&self, parent: &RemoteFile) -> Result<Vec<RemoteFile>, BackendError>;

    async fn make_file(&self, name: &str, parent: &RemoteFile)
    -> Result<RemoteFile, BackendError>;

    async fn make_folder(
        &self,
        name: &str,
        parent: &RemoteFile,
    ) -> Result<RemoteFile, BackendError>;

    async fn copy(&self, source: &RemoteFile, dest: &RemoteFile)
    -> Result<RemoteFile, BackendError>;

    /// Returns false when the backend declined the removal without a
    /// harder failure to report.
    async fn remove(&self, file: &RemoteFile) -> Result<bool, BackendError>;

    async fn exists(&self, path: &str) -> Result<bool, BackendError>;

    async fn chmod(&self, permissions: u32, target: &RemoteFile) -> Result<(), BackendError>;

    async fn chown(&self, uid: u32, target: &RemoteFile) -> Result<(), BackendError>;

    async fn set_current_account(&self, account_id: &str) -> Result<(), BackendError>;

    async fn get_current_account(&self) -> Option<String>;

    async fn remove_account(&self, account_id: &str) -> Result<(), BackendError>;
}
