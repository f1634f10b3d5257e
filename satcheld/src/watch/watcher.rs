use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use notify::event::{AccessKind, AccessMode, ModifyKind};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use satchel_plugin::{PluginBackend, RemoteFile};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

use crate::status::StatusNotifier;

/// A burst of write-close events inside this window coalesces into one
/// upload of the final content.
pub const UPLOAD_DEBOUNCE: Duration = Duration::from_millis(150);

/// A watcher untouched for this long is reclaimed on the next sweep.
pub const WATCHER_TTL: Duration = Duration::from_secs(15 * 60);

/// Sentinel stored in the last-access slot once the watched file is gone.
const ACCESS_EXPIRED: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WatchEvent {
    CloseWrite,
    Removed,
}

/// Observes one locally cached file and pushes edits back to the backend
/// after a debounce delay. Owned by the registry; removal always goes
/// through the registry's locked sweep.
pub struct ChangeWatcher {
    path: PathBuf,
    access_ms: Arc<AtomicI64>,
    stopped: Arc<AtomicBool>,
    os_watcher: Option<RecommendedWatcher>,
    events: Option<JoinHandle<()>>,
}

impl ChangeWatcher {
    pub fn start(
        path: PathBuf,
        remote: RemoteFile,
        backend: Arc<dyn PluginBackend>,
        notifier: StatusNotifier,
        sweep_tx: mpsc::UnboundedSender<()>,
    ) -> notify::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut os_watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if let Ok(event) = res
                && let Some(mapped) = map_watch_event(&event.kind)
            {
                let _ = tx.send(mapped);
            }
        })?;
        os_watcher.watch(&path, RecursiveMode::NonRecursive)?;
        Ok(Self::from_parts(
            path,
            remote,
            backend,
            notifier,
            sweep_tx,
            rx,
            Some(os_watcher),
        ))
    }

    fn from_parts(
        path: PathBuf,
        remote: RemoteFile,
        backend: Arc<dyn PluginBackend>,
        notifier: StatusNotifier,
        sweep_tx: mpsc::UnboundedSender<()>,
        mut rx: mpsc::UnboundedReceiver<WatchEvent>,
        os_watcher: Option<RecommendedWatcher>,
    ) -> Self {
        let access_ms = Arc::new(AtomicI64::new(unix_time_ms()));
        let stopped = Arc::new(AtomicBool::new(false));

        let event_path = path.clone();
        let event_access = Arc::clone(&access_ms);
        let event_stopped = Arc::clone(&stopped);
        let events = tokio::spawn(async move {
            // At most one pending debounced upload; a newer edit replaces it.
            let mut pending: Option<JoinHandle<()>> = None;
            while let Some(event) = rx.recv().await {
                match event {
                    WatchEvent::CloseWrite => {
                        event_access.store(unix_time_ms(), Ordering::SeqCst);
                        if let Some(handle) = pending.take() {
                            handle.abort();
                        }
                        pending = Some(tokio::spawn(debounced_upload(
                            event_path.clone(),
                            remote.clone(),
                            Arc::clone(&backend),
                            notifier.clone(),
                            Arc::clone(&event_access),
                            Arc::clone(&event_stopped),
                        )));
                    }
                    WatchEvent::Removed => {
                        event_access.store(ACCESS_EXPIRED, Ordering::SeqCst);
                        if let Some(handle) = pending.take() {
                            handle.abort();
                        }
                        eprintln!(
                            "[satcheld] {} was deleted, requesting sweep",
                            event_path.display()
                        );
                        let _ = sweep_tx.send(());
                    }
                }
            }
        });

        Self {
            path,
            access_ms,
            stopped,
            os_watcher,
            events: Some(events),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True once the delete sentinel is set or the file went unused for
    /// `WATCHER_TTL`. The stale case also deletes the cached local file,
    /// so the registry calls this exactly once per sweep pass.
    pub fn is_expired(&self) -> bool {
        let access = self.access_ms.load(Ordering::SeqCst);
        if access == ACCESS_EXPIRED {
            return true;
        }
        let elapsed = unix_time_ms().saturating_sub(access);
        if elapsed < WATCHER_TTL.as_millis() as i64 {
            return false;
        }
        eprintln!("[satcheld] watcher expired: {}", self.path.display());
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                eprintln!(
                    "[satcheld] failed to delete stale cache file {}: {err}",
                    self.path.display()
                );
            }
        }
        true
    }

    /// Releases the OS watch and stops the event loop. Idempotent; only
    /// the call that performed the stop returns true.
    pub fn stop_watching(&mut self) -> bool {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(mut os_watcher) = self.os_watcher.take() {
            let _ = os_watcher.unwatch(&self.path);
        }
        if let Some(events) = self.events.take() {
            events.abort();
        }
        eprintln!("[satcheld] unwatching {}", self.path.display());
        true
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    fn backdate_access(&self, age: Duration) {
        self.access_ms
            .store(unix_time_ms() - age.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        self.stop_watching();
    }
}

async fn debounced_upload(
    path: PathBuf,
    remote: RemoteFile,
    backend: Arc<dyn PluginBackend>,
    notifier: StatusNotifier,
    access_ms: Arc<AtomicI64>,
    stopped: Arc<AtomicBool>,
) {
    tokio::time::sleep(UPLOAD_DEBOUNCE).await;
    if stopped.load(Ordering::SeqCst) || access_ms.load(Ordering::SeqCst) == ACCESS_EXPIRED {
        return;
    }
    let Ok(source) = Url::from_file_path(&path) else {
        notifier.error(
            Some(&path.to_string_lossy()),
            format!("cannot build file URL for {}", path.display()),
        );
        return;
    };
    match backend.upload(&source, &remote).await {
        Ok(_) => {
            eprintln!("[satcheld] uploaded {} to {remote}", path.display());
        }
        Err(err) => {
            notifier.error(
                Some(&path.to_string_lossy()),
                format!("failed to upload {}: {err}", path.display()),
            );
        }
    }
}

fn map_watch_event(kind: &EventKind) -> Option<WatchEvent> {
    match kind {
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => Some(WatchEvent::CloseWrite),
        EventKind::Modify(ModifyKind::Data(_)) => Some(WatchEvent::CloseWrite),
        EventKind::Remove(_) => Some(WatchEvent::Removed),
        _ => None,
    }
}

fn unix_time_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}
