use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use satchel_integrations::ids::{
    DBUS_NAME_PLUGIN, DBUS_OBJECT_PATH_AUTH, DBUS_OBJECT_PATH_PLUGIN,
};
use satchel_plugin::PluginBackend;
use tokio::sync::mpsc;
use zbus::connection::Builder as ConnectionBuilder;
use zbus::object_server::SignalEmitter;

use crate::auth::{AuthRequest, Authenticator, CommandAuthenticator};
use crate::rpc::{AuthDbusService, PluginDbusService};
use crate::session::Session;
use crate::status::{StatusEvent, StatusNotifier};
use crate::watch::registry::WatcherRegistry;

const DEFAULT_LOCAL_DIR_NAME: &str = "Satchel";

#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub cache_root: PathBuf,
    pub local_root: PathBuf,
    pub auth_command: Option<String>,
    pub wipe_cache_on_exit: bool,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        let cache_root = std::env::var("SATCHELD_CACHE_DIR")
            .ok()
            .map(|value| expand_with_home(&value, &home))
            .unwrap_or_else(default_cache_root);
        let local_root = std::env::var("SATCHELD_LOCAL_ROOT")
            .ok()
            .map(|value| expand_with_home(&value, &home))
            .unwrap_or_else(|| home.join(DEFAULT_LOCAL_DIR_NAME));
        let auth_command = std::env::var("SATCHELD_AUTH_CMD")
            .ok()
            .filter(|value| !value.trim().is_empty());
        let wipe_cache_on_exit = read_bool_env("SATCHELD_WIPE_CACHE", true);

        Ok(Self {
            cache_root,
            local_root,
            auth_command,
            wipe_cache_on_exit,
        })
    }
}

/// Stand-in used when no authenticator command is configured; every
/// launch fails so connect reports the misconfiguration instead of
/// hanging in the authenticating state.
struct UnconfiguredAuthenticator;

impl Authenticator for UnconfiguredAuthenticator {
    fn launch(&self, request: AuthRequest) -> anyhow::Result<()> {
        anyhow::bail!(
            "no authenticator configured (set SATCHELD_AUTH_CMD), cannot run {:?}",
            request.action
        )
    }
}

pub struct DaemonRuntime {
    config: DaemonConfig,
    session: Arc<Session>,
    registry: Arc<WatcherRegistry>,
    status_rx: mpsc::UnboundedReceiver<StatusEvent>,
    sweep_rx: mpsc::UnboundedReceiver<()>,
    quit_rx: mpsc::UnboundedReceiver<()>,
}

impl DaemonRuntime {
    pub async fn bootstrap(
        config: DaemonConfig,
        backend: Arc<dyn PluginBackend>,
    ) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&config.cache_root)
            .await
            .with_context(|| format!("failed to create cache root at {:?}", config.cache_root))?;

        let (notifier, status_rx) = StatusNotifier::new();
        let (registry, sweep_rx) = WatcherRegistry::new(Arc::clone(&backend), notifier.clone());
        let authenticator: Arc<dyn Authenticator> = match &config.auth_command {
            Some(command) => Arc::new(CommandAuthenticator::new(command)),
            None => Arc::new(UnconfiguredAuthenticator),
        };
        let (quit_tx, quit_rx) = mpsc::unbounded_channel();
        let session = Arc::new(Session::new(
            backend,
            authenticator,
            Arc::clone(&registry),
            notifier,
            quit_tx,
        ));

        Ok(Self {
            config,
            session,
            registry,
            status_rx,
            sweep_rx,
            quit_rx,
        })
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        eprintln!(
            "[satcheld] started: cache_root={}, authenticator={}",
            self.config.cache_root.display(),
            if self.config.auth_command.is_some() {
                "configured"
            } else {
                "missing"
            }
        );

        let dbus_connection = ConnectionBuilder::session()?
            .name(DBUS_NAME_PLUGIN)?
            .serve_at(
                DBUS_OBJECT_PATH_PLUGIN,
                PluginDbusService::new(Arc::clone(&self.session)),
            )?
            .serve_at(
                DBUS_OBJECT_PATH_AUTH,
                AuthDbusService::new(Arc::clone(&self.session)),
            )?
            .build()
            .await
            .context("failed to start D-Bus object server")?;

        let signal_emitter = SignalEmitter::new(&dbus_connection, DBUS_OBJECT_PATH_PLUGIN)
            .context("failed to create D-Bus signal emitter")?
            .into_owned();
        let mut status_rx = self.status_rx;
        let status_handle = tokio::spawn(async move {
            while let Some(event) = status_rx.recv().await {
                match event {
                    StatusEvent::Status(status) => {
                        eprintln!("[satcheld] status: {}", status.as_str());
                        let _ =
                            PluginDbusService::status_changed(&signal_emitter, status.as_str())
                                .await;
                    }
                    StatusEvent::Error { path, message } => {
                        let path = path.unwrap_or_default();
                        eprintln!("[satcheld] error: path={path} {message}");
                        let _ =
                            PluginDbusService::plugin_error(&signal_emitter, &path, &message)
                                .await;
                    }
                }
            }
        });

        let registry_for_sweep = Arc::clone(&self.registry);
        let mut sweep_rx = self.sweep_rx;
        let sweep_handle = tokio::spawn(async move {
            while sweep_rx.recv().await.is_some() {
                registry_for_sweep.sweep_expired().await;
            }
        });

        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res.context("failed waiting for shutdown signal")?;
            }
            _ = self.quit_rx.recv() => {
                eprintln!("[satcheld] quit requested over the bus");
            }
        }

        sweep_handle.abort();
        self.registry.teardown_all().await;
        if self.config.wipe_cache_on_exit
            && let Err(err) = wipe_directory(&self.config.cache_root).await
        {
            eprintln!("[satcheld] cache wipe failed: {err}");
        }
        status_handle.abort();

        Ok(())
    }
}

include!("daemon_helpers.rs");

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
