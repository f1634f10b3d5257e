use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use satchel_plugin::{BackendError, PluginBackend, RemoteFile};
use url::Url;

use crate::auth::{AuthRequest, Authenticator};

/// Backend double that records every delegated call and can be told to
/// fail specific operations.
#[derive(Default)]
pub(crate) struct SpyBackend {
    pub connected: AtomicBool,
    pub auth_needed: AtomicBool,
    pub fail_connect: AtomicBool,
    pub fail_disconnect: AtomicBool,
    pub fail_upload: AtomicBool,
    pub remove_returns_false: AtomicBool,
    pub account: Mutex<Option<String>>,
    pub open_file_url: Mutex<Option<Url>>,
    pub calls: Mutex<Vec<String>>,
    pub uploads: Mutex<Vec<(Url, RemoteFile)>>,
}

impl SpyBackend {
    pub fn disconnected() -> Self {
        Self::default()
    }

    pub fn connected() -> Self {
        let spy = Self::default();
        spy.connected.store(true, Ordering::SeqCst);
        spy
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|name| name.as_str() == op)
            .count()
    }

    fn record(&self, op: &str) {
        self.calls.lock().unwrap().push(op.to_string());
    }

    fn failure(op: &str) -> BackendError {
        BackendError::msg(format!("{op} failed on purpose"))
    }
}

#[async_trait]
impl PluginBackend for SpyBackend {
    // The query methods yield before answering so concurrent callers in
    // tests actually interleave at the guard checks.
    async fn authentication_needed(&self) -> bool {
        self.record("authentication_needed");
        tokio::task::yield_now().await;
        self.auth_needed.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<(), BackendError> {
        self.record("connect");
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(Self::failure("connect"));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BackendError> {
        self.record("disconnect");
        if self.fail_disconnect.load(Ordering::SeqCst) {
            return Err(Self::failure("disconnect"));
        }
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        tokio::task::yield_now().await;
        self.connected.load(Ordering::SeqCst)
    }

    async fn open_file(&self, file: &RemoteFile) -> Result<Url, BackendError> {
        self.record("open_file");
        if let Some(url) = self.open_file_url.lock().unwrap().clone() {
            return Ok(url);
        }
        Url::parse(&format!("file:///tmp/satchel-spy/{}", file.id))
            .map_err(|err| BackendError::msg(err.to_string()))
    }

    async fn upload(&self, source: &Url, dest: &RemoteFile) -> Result<RemoteFile, BackendError> {
        self.record("upload");
        self.uploads
            .lock()
            .unwrap()
            .push((source.clone(), dest.clone()));
        if self.fail_upload.load(Ordering::SeqCst) {
            return Err(Self::failure("upload"));
        }
        Ok(dest.clone())
    }

    async fn download(&self, _source: &RemoteFile, dest: &Url) -> Result<Url, BackendError> {
        self.record("download");
        Ok(dest.clone())
    }

    async fn list_files(&self, parent: &RemoteFile) -> Result<Vec<RemoteFile>, BackendError> {
        self.record("list_files");
        Ok(vec![
            RemoteFile::file(format!("{}/a.txt", parent.id), "a.txt").with_parent(&parent.id),
        ])
    }

    async fn make_file(
        &self,
        name: &str,
        parent: &RemoteFile,
    ) -> Result<RemoteFile, BackendError> {
        self.record("make_file");
        Ok(RemoteFile::file(format!("{}/{name}", parent.id), name).with_parent(&parent.id))
    }

    async fn make_folder(
        &self,
        name: &str,
        parent: &RemoteFile,
    ) -> Result<RemoteFile, BackendError> {
        self.record("make_folder");
        Ok(RemoteFile::folder(format!("{}/{name}", parent.id), name).with_parent(&parent.id))
    }

    async fn copy(
        &self,
        source: &RemoteFile,
        dest: &RemoteFile,
    ) -> Result<RemoteFile, BackendError> {
        self.record("copy");
        Ok(RemoteFile::file(format!("{}/{}", dest.id, source.name), &source.name)
            .with_parent(&dest.id))
    }

    async fn remove(&self, _file: &RemoteFile) -> Result<bool, BackendError> {
        self.record("remove");
        Ok(!self.remove_returns_false.load(Ordering::SeqCst))
    }

    async fn exists(&self, _path: &str) -> Result<bool, BackendError> {
        self.record("exists");
        Ok(true)
    }

    async fn chmod(&self, _permissions: u32, _target: &RemoteFile) -> Result<(), BackendError> {
        self.record("chmod");
        Ok(())
    }

    async fn chown(&self, _uid: u32, _target: &RemoteFile) -> Result<(), BackendError> {
        self.record("chown");
        Ok(())
    }

    async fn set_current_account(&self, account_id: &str) -> Result<(), BackendError> {
        self.record("set_current_account");
        *self.account.lock().unwrap() = Some(account_id.to_string());
        Ok(())
    }

    async fn get_current_account(&self) -> Option<String> {
        self.account.lock().unwrap().clone()
    }

    async fn remove_account(&self, account_id: &str) -> Result<(), BackendError> {
        self.record("remove_account");
        let mut account = self.account.lock().unwrap();
        if account.as_deref() == Some(account_id) {
            *account = None;
        }
        Ok(())
    }
}

/// Authenticator double that records launch requests instead of spawning
/// anything.
#[derive(Default)]
pub(crate) struct RecordingAuthenticator {
    pub launches: Mutex<Vec<AuthRequest>>,
    pub fail: AtomicBool,
}

impl Authenticator for RecordingAuthenticator {
    fn launch(&self, request: AuthRequest) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("authenticator unavailable");
        }
        self.launches.lock().unwrap().push(request);
        Ok(())
    }
}

impl RecordingAuthenticator {
    pub fn launch_count(&self) -> usize {
        self.launches.lock().unwrap().len()
    }
}
