use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use satchel_plugin::{PluginBackend, RemoteFile};
use tokio::sync::{Mutex, mpsc};

use crate::status::StatusNotifier;
use crate::watch::watcher::ChangeWatcher;

/// Locked path -> watcher map owned by the session. One lock serializes
/// inserts from RPC-driven file opens, sweeps triggered by delete events,
/// and shutdown teardown.
pub struct WatcherRegistry {
    backend: Arc<dyn PluginBackend>,
    notifier: StatusNotifier,
    sweep_tx: mpsc::UnboundedSender<()>,
    watchers: Mutex<HashMap<PathBuf, ChangeWatcher>>,
}

impl WatcherRegistry {
    /// Returns the registry and the sweep-request channel its watchers
    /// signal on delete events; the daemon services that channel.
    pub fn new(
        backend: Arc<dyn PluginBackend>,
        notifier: StatusNotifier,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<()>) {
        let (sweep_tx, sweep_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(Self {
            backend,
            notifier,
            sweep_tx,
            watchers: Mutex::new(HashMap::new()),
        });
        (registry, sweep_rx)
    }

    /// No-op when a watcher for `path` already exists; otherwise reclaims
    /// expired watchers first and inserts a fresh one.
    pub async fn ensure_watching(&self, path: &Path, remote: &RemoteFile) -> notify::Result<()> {
        let mut watchers = self.watchers.lock().await;
        if watchers.contains_key(path) {
            return Ok(());
        }
        Self::sweep_locked(&mut watchers);
        let watcher = ChangeWatcher::start(
            path.to_path_buf(),
            remote.clone(),
            Arc::clone(&self.backend),
            self.notifier.clone(),
            self.sweep_tx.clone(),
        )?;
        eprintln!("[satcheld] watching {}", path.display());
        watchers.insert(path.to_path_buf(), watcher);
        Ok(())
    }

    pub async fn sweep_expired(&self) {
        let mut watchers = self.watchers.lock().await;
        Self::sweep_locked(&mut watchers);
    }

    fn sweep_locked(watchers: &mut HashMap<PathBuf, ChangeWatcher>) {
        // One is_expired call per watcher per pass; the stale branch
        // deletes the cached file as a side effect.
        let expired: Vec<PathBuf> = watchers
            .iter()
            .filter(|(_, watcher)| watcher.is_expired())
            .map(|(path, _)| path.clone())
            .collect();
        for path in expired {
            if let Some(mut watcher) = watchers.remove(&path) {
                watcher.stop_watching();
            }
        }
    }

    /// Stops every watcher and clears the map, returning how many this
    /// call actually stopped. Called once at service shutdown; no watcher
    /// operation is valid afterwards.
    pub async fn teardown_all(&self) -> usize {
        let mut watchers = self.watchers.lock().await;
        let mut stopped = 0;
        for (_, mut watcher) in watchers.drain() {
            if watcher.stop_watching() {
                stopped += 1;
            }
        }
        stopped
    }

    pub async fn len(&self) -> usize {
        self.watchers.lock().await.len()
    }

    #[cfg(test)]
    pub(crate) async fn with_watcher<R>(
        &self,
        path: &Path,
        f: impl FnOnce(&ChangeWatcher) -> R,
    ) -> Option<R> {
        let watchers = self.watchers.lock().await;
        watchers.get(path).map(|watcher| f(watcher))
    }
}
