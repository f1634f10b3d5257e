use std::sync::Arc;

use satchel_integrations::ids::{
    DBUS_ERROR_ALREADY_CONNECTED, DBUS_ERROR_BACKEND, DBUS_ERROR_NOT_CONNECTED,
};
use satchel_plugin::RemoteFile;
use url::Url;
use zbus::{interface, object_server::SignalEmitter};

use crate::auth::AuthOutcome;
use crate::session::{ServiceError, Session};

/// `RemoteFile` as it crosses the bus: `(id, name, is_dir, parent)` with an
/// empty parent string standing in for "no parent".
pub type RemoteFileTuple = (String, String, bool, String);

pub fn file_to_tuple(file: RemoteFile) -> RemoteFileTuple {
    (
        file.id,
        file.name,
        file.is_dir,
        file.parent.unwrap_or_default(),
    )
}

pub fn file_from_tuple(tuple: RemoteFileTuple) -> RemoteFile {
    let (id, name, is_dir, parent) = tuple;
    RemoteFile {
        id,
        name,
        is_dir,
        parent: if parent.is_empty() {
            None
        } else {
            Some(parent)
        },
    }
}

pub fn dbus_error_name(err: &ServiceError) -> &'static str {
    match err {
        ServiceError::NotConnected => DBUS_ERROR_NOT_CONNECTED,
        ServiceError::AlreadyConnected => DBUS_ERROR_ALREADY_CONNECTED,
        ServiceError::Backend(_) => DBUS_ERROR_BACKEND,
    }
}

fn map_to_fdo(err: ServiceError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(format!("{}: {}", dbus_error_name(&err), err))
}

fn parse_url(raw: &str) -> Result<Url, zbus::fdo::Error> {
    Url::parse(raw).map_err(|err| zbus::fdo::Error::InvalidArgs(format!("bad url {raw}: {err}")))
}

fn opt(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

pub struct PluginDbusService {
    session: Arc<Session>,
}

impl PluginDbusService {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

#[interface(name = "io.satchel.Plugin1")]
impl PluginDbusService {
    async fn authentication_needed(&self) -> zbus::fdo::Result<bool> {
        Ok(self.session.authentication_needed().await)
    }

    async fn is_connected(&self) -> zbus::fdo::Result<bool> {
        Ok(self.session.is_connected().await)
    }

    async fn connect(&self) -> zbus::fdo::Result<()> {
        eprintln!("[satcheld] dbus Connect");
        self.session.connect().await.map_err(map_to_fdo)
    }

    async fn disconnect(&self) -> zbus::fdo::Result<()> {
        eprintln!("[satcheld] dbus Disconnect");
        self.session.disconnect().await;
        Ok(())
    }

    async fn exit(&self) -> zbus::fdo::Result<()> {
        eprintln!("[satcheld] dbus Exit");
        self.session.exit().await;
        Ok(())
    }

    async fn open_file(&self, file: RemoteFileTuple, watch: bool) -> zbus::fdo::Result<String> {
        let file = file_from_tuple(file);
        eprintln!("[satcheld] dbus OpenFile id={} watch={watch}", file.id);
        let url = self
            .session
            .open_file(&file, watch)
            .await
            .map_err(map_to_fdo)?;
        Ok(url.into())
    }

    async fn upload(&self, source: &str, dest: RemoteFileTuple) -> zbus::fdo::Result<RemoteFileTuple> {
        let source = parse_url(source)?;
        let dest = file_from_tuple(dest);
        eprintln!("[satcheld] dbus Upload source={source} dest={}", dest.id);
        let uploaded = self
            .session
            .upload(&source, &dest)
            .await
            .map_err(map_to_fdo)?;
        Ok(file_to_tuple(uploaded))
    }

    async fn download(&self, source: RemoteFileTuple, dest: &str) -> zbus::fdo::Result<String> {
        let source = file_from_tuple(source);
        let dest = parse_url(dest)?;
        eprintln!("[satcheld] dbus Download source={} dest={dest}", source.id);
        let url = self
            .session
            .download(&source, &dest)
            .await
            .map_err(map_to_fdo)?;
        Ok(url.into())
    }

    async fn list_files(&self, parent: RemoteFileTuple) -> zbus::fdo::Result<Vec<RemoteFileTuple>> {
        let parent = file_from_tuple(parent);
        eprintln!("[satcheld] dbus ListFiles parent={}", parent.id);
        let files = self
            .session
            .list_files(&parent)
            .await
            .map_err(map_to_fdo)?;
        Ok(files.into_iter().map(file_to_tuple).collect())
    }

    async fn make_file(
        &self,
        name: &str,
        parent: RemoteFileTuple,
    ) -> zbus::fdo::Result<RemoteFileTuple> {
        let parent = file_from_tuple(parent);
        eprintln!("[satcheld] dbus MakeFile name={name} parent={}", parent.id);
        let made = self
            .session
            .make_file(name, &parent)
            .await
            .map_err(map_to_fdo)?;
        Ok(file_to_tuple(made))
    }

    async fn make_folder(
        &self,
        name: &str,
        parent: RemoteFileTuple,
    ) -> zbus::fdo::Result<RemoteFileTuple> {
        let parent = file_from_tuple(parent);
        eprintln!("[satcheld] dbus MakeFolder name={name} parent={}", parent.id);
        let made = self
            .session
            .make_folder(name, &parent)
            .await
            .map_err(map_to_fdo)?;
        Ok(file_to_tuple(made))
    }

    async fn copy(
        &self,
        source: RemoteFileTuple,
        dest: RemoteFileTuple,
    ) -> zbus::fdo::Result<RemoteFileTuple> {
        let source = file_from_tuple(source);
        let dest = file_from_tuple(dest);
        eprintln!("[satcheld] dbus Copy source={} dest={}", source.id, dest.id);
        let copied = self
            .session
            .copy(&source, &dest)
            .await
            .map_err(map_to_fdo)?;
        Ok(file_to_tuple(copied))
    }

    async fn remove(&self, file: RemoteFileTuple) -> zbus::fdo::Result<()> {
        let file = file_from_tuple(file);
        eprintln!("[satcheld] dbus Remove id={}", file.id);
        self.session.remove(&file).await.map_err(map_to_fdo)
    }

    async fn exists(&self, path: &str) -> zbus::fdo::Result<bool> {
        Ok(self.session.exists(path).await)
    }

    async fn chmod(&self, permissions: u32, target: RemoteFileTuple) -> zbus::fdo::Result<()> {
        let target = file_from_tuple(target);
        eprintln!(
            "[satcheld] dbus Chmod permissions={permissions:o} id={}",
            target.id
        );
        self.session
            .chmod(permissions, &target)
            .await
            .map_err(map_to_fdo)
    }

    async fn chown(&self, uid: u32, target: RemoteFileTuple) -> zbus::fdo::Result<()> {
        let target = file_from_tuple(target);
        eprintln!("[satcheld] dbus Chown uid={uid} id={}", target.id);
        self.session.chown(uid, &target).await.map_err(map_to_fdo)
    }

    async fn get_current_account(&self) -> zbus::fdo::Result<String> {
        Ok(self.session.get_current_account().await.unwrap_or_default())
    }

    async fn set_current_account(&self, account_id: &str) -> zbus::fdo::Result<()> {
        eprintln!("[satcheld] dbus SetCurrentAccount account={account_id}");
        self.session
            .set_current_account(account_id)
            .await
            .map_err(map_to_fdo)
    }

    async fn remove_account(&self, account_id: &str) -> zbus::fdo::Result<()> {
        eprintln!("[satcheld] dbus RemoveAccount account={account_id}");
        self.session
            .remove_account(account_id)
            .await
            .map_err(map_to_fdo)
    }

    async fn add_account(&self, initial: bool) -> zbus::fdo::Result<()> {
        eprintln!("[satcheld] dbus AddAccount initial={initial}");
        self.session.add_account(initial).await;
        Ok(())
    }

    async fn open_settings(
        &self,
        account_id: &str,
        account_display: &str,
        initial_path: &str,
    ) -> zbus::fdo::Result<()> {
        eprintln!("[satcheld] dbus OpenSettings account={account_id}");
        self.session
            .open_settings(opt(account_id), opt(account_display), opt(initial_path))
            .await;
        Ok(())
    }

    #[zbus(signal)]
    pub async fn status_changed(ctxt: &SignalEmitter<'_>, status: &str) -> zbus::Result<()>;

    #[zbus(signal)]
    pub async fn plugin_error(
        ctxt: &SignalEmitter<'_>,
        path: &str,
        message: &str,
    ) -> zbus::Result<()>;
}

/// Callback surface the authenticator process reports back through. Each
/// method delivers one terminal outcome for the round-trip the session
/// started; the session drops anything it was not waiting for.
pub struct AuthDbusService {
    session: Arc<Session>,
}

impl AuthDbusService {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

#[interface(name = "io.satchel.Auth1")]
impl AuthDbusService {
    async fn authenticated(
        &self,
        account_id: &str,
        account_display: &str,
        initial_path: &str,
    ) -> zbus::fdo::Result<()> {
        eprintln!("[satcheld] dbus Authenticated account={account_id}");
        self.session
            .handle_auth_outcome(AuthOutcome::Authenticated {
                account_id: opt(account_id),
                account_display: opt(account_display),
                initial_path: opt(initial_path),
            })
            .await;
        Ok(())
    }

    async fn account_added(
        &self,
        account_id: &str,
        account_display: &str,
        initial_path: &str,
    ) -> zbus::fdo::Result<()> {
        eprintln!("[satcheld] dbus AccountAdded account={account_id}");
        self.session
            .handle_auth_outcome(AuthOutcome::AccountAdded {
                account_id: opt(account_id),
                account_display: opt(account_display),
                initial_path: opt(initial_path),
            })
            .await;
        Ok(())
    }

    async fn settings_changed(
        &self,
        account_id: &str,
        account_display: &str,
        initial_path: &str,
    ) -> zbus::fdo::Result<()> {
        eprintln!("[satcheld] dbus SettingsChanged account={account_id}");
        self.session
            .handle_auth_outcome(AuthOutcome::SettingsChanged {
                account_id: opt(account_id),
                account_display: opt(account_display),
                initial_path: opt(initial_path),
            })
            .await;
        Ok(())
    }

    async fn cancelled(&self) -> zbus::fdo::Result<()> {
        eprintln!("[satcheld] dbus Cancelled");
        self.session.handle_auth_outcome(AuthOutcome::Cancelled).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Authenticator;
    use crate::status::StatusNotifier;
    use crate::testutil::{RecordingAuthenticator, SpyBackend};
    use crate::watch::registry::WatcherRegistry;
    use satchel_plugin::PluginBackend;
    use tokio::sync::mpsc;

    fn service_over_spy() -> (PluginDbusService, Arc<SpyBackend>) {
        let backend = Arc::new(SpyBackend::connected());
        let authenticator = Arc::new(RecordingAuthenticator::default());
        let (notifier, _status_rx) = StatusNotifier::new();
        let (registry, _sweep_rx) = WatcherRegistry::new(
            Arc::clone(&backend) as Arc<dyn PluginBackend>,
            notifier.clone(),
        );
        let (quit_tx, _quit_rx) = mpsc::unbounded_channel();
        let session = Arc::new(Session::new(
            Arc::clone(&backend) as Arc<dyn PluginBackend>,
            authenticator as Arc<dyn Authenticator>,
            registry,
            notifier,
            quit_tx,
        ));
        (PluginDbusService::new(session), backend)
    }

    #[test]
    fn tuple_round_trips_preserve_the_parent() {
        let file = RemoteFile::file("docs/a.txt", "a.txt").with_parent("docs");
        let tuple = file_to_tuple(file.clone());
        assert_eq!(tuple.3, "docs");
        assert_eq!(file_from_tuple(tuple), file);
    }

    #[test]
    fn empty_parent_string_means_no_parent() {
        let root = file_from_tuple(("".into(), "/".into(), true, "".into()));
        assert_eq!(root.parent, None);
        assert_eq!(file_to_tuple(root).3, "");
    }

    #[test]
    fn maps_errors_to_stable_dbus_names() {
        assert_eq!(
            dbus_error_name(&ServiceError::NotConnected),
            DBUS_ERROR_NOT_CONNECTED
        );
        assert_eq!(
            dbus_error_name(&ServiceError::AlreadyConnected),
            DBUS_ERROR_ALREADY_CONNECTED
        );
        assert_eq!(
            dbus_error_name(&ServiceError::Backend("boom".into())),
            DBUS_ERROR_BACKEND
        );
    }

    #[test]
    fn opt_turns_empty_strings_into_none() {
        assert_eq!(opt(""), None);
        assert_eq!(opt("acct-1"), Some("acct-1".to_string()));
    }

    #[tokio::test]
    async fn guard_failures_carry_the_error_name_over_the_bus() {
        let backend = Arc::new(SpyBackend::disconnected());
        let authenticator = Arc::new(RecordingAuthenticator::default());
        let (notifier, _status_rx) = StatusNotifier::new();
        let (registry, _sweep_rx) = WatcherRegistry::new(
            Arc::clone(&backend) as Arc<dyn PluginBackend>,
            notifier.clone(),
        );
        let (quit_tx, _quit_rx) = mpsc::unbounded_channel();
        let session = Arc::new(Session::new(
            backend as Arc<dyn PluginBackend>,
            authenticator as Arc<dyn Authenticator>,
            registry,
            notifier,
            quit_tx,
        ));
        let service = PluginDbusService::new(session);

        let parent = ("".to_string(), "/".to_string(), true, "".to_string());
        let err = service
            .list_files(parent)
            .await
            .expect_err("expected a guard failure");
        match err {
            zbus::fdo::Error::Failed(msg) => {
                assert!(msg.contains(DBUS_ERROR_NOT_CONNECTED));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn list_files_round_trips_through_the_tuple_codec() {
        let (service, _backend) = service_over_spy();
        let parent = ("docs".to_string(), "Docs".to_string(), true, "".to_string());
        let files = service.list_files(parent).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, "docs/a.txt");
        assert_eq!(files[0].3, "docs");
    }

    #[tokio::test]
    async fn upload_rejects_a_malformed_source_url() {
        let (service, backend) = service_over_spy();
        let dest = ("docs/a.txt".to_string(), "a.txt".to_string(), false, "".to_string());
        let err = service
            .upload("not a url", dest)
            .await
            .expect_err("expected an InvalidArgs error");
        assert!(matches!(err, zbus::fdo::Error::InvalidArgs(_)));
        assert_eq!(backend.count("upload"), 0);
    }

    #[tokio::test]
    async fn get_current_account_defaults_to_empty() {
        let (service, backend) = service_over_spy();
        assert_eq!(service.get_current_account().await.unwrap(), "");
        service.set_current_account("acct-1").await.unwrap();
        assert_eq!(service.get_current_account().await.unwrap(), "acct-1");
        assert_eq!(backend.count("set_current_account"), 1);
    }
}
