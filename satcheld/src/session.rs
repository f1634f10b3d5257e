use std::sync::Arc;

use satchel_plugin::{BackendError, PluginBackend, RemoteFile};
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use url::Url;

use crate::auth::{AuthAction, AuthOutcome, AuthRequest, Authenticator};
use crate::status::{SessionStatus, StatusNotifier};
use crate::watch::registry::WatcherRegistry;

/// Structured failure returned across the RPC surface. Guard failures are
/// detected before touching the backend; backend failures are caught here
/// and reduced to their message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("not connected")]
    NotConnected,
    #[error("already connected")]
    AlreadyConnected,
    #[error("{0}")]
    Backend(String),
}

impl ServiceError {
    fn backend(err: BackendError) -> Self {
        Self::Backend(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Authenticating,
    Connecting,
    Connected,
    Disconnecting,
}

/// Session lifecycle and the operation surface behind the RPC layer.
///
/// D-Bus calls and authenticator callbacks may arrive concurrently, so the
/// state mutex is held across each whole transition, never just per field
/// access; one caller performs the transition and later callers observe
/// its result. Connectivity guards consult the backend directly, matching
/// the behavior the host observes.
pub struct Session {
    backend: Arc<dyn PluginBackend>,
    authenticator: Arc<dyn Authenticator>,
    registry: Arc<WatcherRegistry>,
    notifier: StatusNotifier,
    state: Mutex<SessionState>,
    auth_pending: Mutex<bool>,
    quit_tx: mpsc::UnboundedSender<()>,
}

impl Session {
    pub fn new(
        backend: Arc<dyn PluginBackend>,
        authenticator: Arc<dyn Authenticator>,
        registry: Arc<WatcherRegistry>,
        notifier: StatusNotifier,
        quit_tx: mpsc::UnboundedSender<()>,
    ) -> Self {
        Self {
            backend,
            authenticator,
            registry,
            notifier,
            state: Mutex::new(SessionState::Disconnected),
            auth_pending: Mutex::new(false),
            quit_tx,
        }
    }

    pub async fn state(&self) -> SessionState {
        *self.state.lock().await
    }

    async fn require_connected(&self) -> Result<(), ServiceError> {
        if self.backend.is_connected().await {
            Ok(())
        } else {
            Err(ServiceError::NotConnected)
        }
    }

    async fn begin_auth_attempt(&self) {
        *self.auth_pending.lock().await = true;
    }

    /// Consumes the pending attempt; only the first terminal outcome per
    /// round-trip gets to act.
    async fn take_auth_attempt(&self) -> bool {
        let mut pending = self.auth_pending.lock().await;
        std::mem::replace(&mut *pending, false)
    }

    fn stop_service(&self) {
        let _ = self.quit_tx.send(());
    }

    pub async fn authentication_needed(&self) -> bool {
        self.backend.authentication_needed().await
    }

    pub async fn is_connected(&self) -> bool {
        self.backend.is_connected().await
    }

    /// Holds the state lock for the entire transition, so of two
    /// concurrent calls exactly one touches the backend and the other
    /// fails with `AlreadyConnected`.
    pub async fn connect(&self) -> Result<(), ServiceError> {
        let mut state = self.state.lock().await;
        if *state != SessionState::Disconnected || self.backend.is_connected().await {
            return Err(ServiceError::AlreadyConnected);
        }
        if self.backend.authentication_needed().await {
            *state = SessionState::Authenticating;
            self.notifier.status(SessionStatus::Authenticating);
            self.begin_auth_attempt().await;
            if let Err(err) = self
                .authenticator
                .launch(AuthRequest::new(AuthAction::Authenticate))
            {
                self.take_auth_attempt().await;
                *state = SessionState::Disconnected;
                self.notifier.status(SessionStatus::ConnectError);
                return Err(ServiceError::Backend(err.to_string()));
            }
            return Ok(());
        }
        self.complete_connect(&mut state).await
    }

    /// Caller passes the held state lock in.
    async fn complete_connect(&self, state: &mut SessionState) -> Result<(), ServiceError> {
        *state = SessionState::Connecting;
        self.notifier.status(SessionStatus::Connecting);
        match self.backend.connect().await {
            Ok(()) => {
                *state = SessionState::Connected;
                self.notifier.status(SessionStatus::Connected);
                Ok(())
            }
            Err(err) => {
                self.notifier.status(SessionStatus::ConnectError);
                *state = SessionState::Disconnected;
                Err(ServiceError::backend(err))
            }
        }
    }

    /// Best-effort disconnect: a backend failure is logged, never allowed
    /// to block shutdown.
    pub async fn disconnect(&self) {
        let mut state = self.state.lock().await;
        *state = SessionState::Disconnecting;
        self.notifier.status(SessionStatus::Disconnecting);
        if let Err(err) = self.backend.disconnect().await {
            eprintln!("[satcheld] disconnect failed (ignored): {err}");
        }
        *state = SessionState::Disconnected;
        self.notifier.status(SessionStatus::Disconnected);
        drop(state);
        self.stop_service();
    }

    pub async fn exit(&self) {
        if self.backend.is_connected().await {
            self.disconnect().await;
        } else {
            self.stop_service();
        }
    }

    /// Applies the terminal outcome of one authenticator round-trip.
    /// Late or duplicate outcomes find no pending attempt and are dropped.
    pub async fn handle_auth_outcome(&self, outcome: AuthOutcome) {
        if !self.take_auth_attempt().await {
            eprintln!("[satcheld] auth outcome without a pending attempt, dropping: {outcome:?}");
            return;
        }
        let mut state = self.state.lock().await;
        match outcome {
            AuthOutcome::Cancelled => {
                eprintln!("[satcheld] authentication cancelled");
                *state = SessionState::Disconnected;
                self.notifier.status(SessionStatus::Disconnected);
                drop(state);
                self.stop_service();
            }
            AuthOutcome::Authenticated { account_id, .. } => {
                self.apply_account(account_id.as_deref()).await;
                if let Err(err) = self.complete_connect(&mut state).await {
                    eprintln!("[satcheld] connect after authentication failed: {err}");
                }
            }
            AuthOutcome::AccountAdded { account_id, .. } => {
                self.apply_account(account_id.as_deref()).await;
                if *state == SessionState::Authenticating {
                    if let Err(err) = self.complete_connect(&mut state).await {
                        eprintln!("[satcheld] connect after adding account failed: {err}");
                    }
                }
            }
            AuthOutcome::SettingsChanged { account_id, .. } => {
                self.apply_account(account_id.as_deref()).await;
            }
        }
    }

    async fn apply_account(&self, account_id: Option<&str>) {
        let Some(account_id) = account_id else {
            return;
        };
        if let Err(err) = self.backend.set_current_account(account_id).await {
            self.notifier
                .error(None, format!("failed to switch to account {account_id}: {err}"));
        }
    }

    pub async fn open_file(&self, file: &RemoteFile, watch: bool) -> Result<Url, ServiceError> {
        self.require_connected().await?;
        let url = self
            .backend
            .open_file(file)
            .await
            .map_err(ServiceError::backend)?;
        if watch
            && url.scheme() == "file"
            && let Ok(path) = url.to_file_path()
        {
            self.registry
                .ensure_watching(&path, file)
                .await
                .map_err(|err| {
                    ServiceError::Backend(format!("failed to watch {}: {err}", path.display()))
                })?;
        }
        Ok(url)
    }

    pub async fn upload(&self, source: &Url, dest: &RemoteFile) -> Result<RemoteFile, ServiceError> {
        self.require_connected().await?;
        self.notifier.status(SessionStatus::Uploading);
        let result = self
            .backend
            .upload(source, dest)
            .await
            .map_err(ServiceError::backend);
        self.notifier.status(SessionStatus::Connected);
        result
    }

    pub async fn download(&self, source: &RemoteFile, dest: &Url) -> Result<Url, ServiceError> {
        self.backend
            .download(source, dest)
            .await
            .map_err(ServiceError::backend)
    }

    pub async fn list_files(&self, parent: &RemoteFile) -> Result<Vec<RemoteFile>, ServiceError> {
        self.require_connected().await?;
        self.backend
            .list_files(parent)
            .await
            .map_err(ServiceError::backend)
    }

    pub async fn make_file(
        &self,
        name: &str,
        parent: &RemoteFile,
    ) -> Result<RemoteFile, ServiceError> {
        self.require_connected().await?;
        self.backend
            .make_file(name, parent)
            .await
            .map_err(ServiceError::backend)
    }

    pub async fn make_folder(
        &self,
        name: &str,
        parent: &RemoteFile,
    ) -> Result<RemoteFile, ServiceError> {
        self.require_connected().await?;
        self.backend
            .make_folder(name, parent)
            .await
            .map_err(ServiceError::backend)
    }

    pub async fn copy(
        &self,
        source: &RemoteFile,
        dest: &RemoteFile,
    ) -> Result<RemoteFile, ServiceError> {
        self.require_connected().await?;
        self.backend
            .copy(source, dest)
            .await
            .map_err(ServiceError::backend)
    }

    pub async fn remove(&self, file: &RemoteFile) -> Result<(), ServiceError> {
        self.require_connected().await?;
        match self.backend.remove(file).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(ServiceError::Backend(format!(
                "unable to remove file or folder {file}"
            ))),
            Err(err) => Err(ServiceError::backend(err)),
        }
    }

    pub async fn chmod(&self, permissions: u32, target: &RemoteFile) -> Result<(), ServiceError> {
        self.require_connected().await?;
        self.backend
            .chmod(permissions, target)
            .await
            .map_err(ServiceError::backend)
    }

    pub async fn chown(&self, uid: u32, target: &RemoteFile) -> Result<(), ServiceError> {
        self.require_connected().await?;
        self.backend
            .chown(uid, target)
            .await
            .map_err(ServiceError::backend)
    }

    /// Degrades to `false` on a failed guard or backend failure instead of
    /// erroring.
    pub async fn exists(&self, path: &str) -> bool {
        if !self.backend.is_connected().await {
            return false;
        }
        self.backend.exists(path).await.unwrap_or(false)
    }

    pub async fn get_current_account(&self) -> Option<String> {
        self.backend.get_current_account().await
    }

    pub async fn set_current_account(&self, account_id: &str) -> Result<(), ServiceError> {
        self.backend
            .set_current_account(account_id)
            .await
            .map_err(ServiceError::backend)
    }

    /// Removing the active account disconnects first; unlike the exit
    /// path, that disconnect failure is surfaced and blocks the removal.
    pub async fn remove_account(&self, account_id: &str) -> Result<(), ServiceError> {
        if let Some(active) = self.backend.get_current_account().await
            && active == account_id
        {
            let mut state = self.state.lock().await;
            self.backend.disconnect().await.map_err(|err| {
                ServiceError::Backend(format!(
                    "failed to disconnect the active account before removal: {err}"
                ))
            })?;
            *state = SessionState::Disconnected;
            self.notifier.status(SessionStatus::Disconnected);
        }
        self.backend
            .remove_account(account_id)
            .await
            .map_err(ServiceError::backend)
    }

    pub async fn add_account(&self, initial: bool) {
        let action = if initial {
            AuthAction::Authenticate
        } else {
            AuthAction::AddAccount
        };
        self.begin_auth_attempt().await;
        if let Err(err) = self.authenticator.launch(AuthRequest::new(action)) {
            self.take_auth_attempt().await;
            self.notifier
                .error(None, format!("failed to launch authenticator: {err}"));
        }
    }

    pub async fn open_settings(
        &self,
        account_id: Option<String>,
        account_display: Option<String>,
        initial_path: Option<String>,
    ) {
        self.begin_auth_attempt().await;
        let request = AuthRequest {
            action: AuthAction::Settings,
            account_id,
            account_display,
            initial_path,
        };
        if let Err(err) = self.authenticator.launch(request) {
            self.take_auth_attempt().await;
            self.notifier
                .error(None, format!("failed to open settings: {err}"));
        }
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
