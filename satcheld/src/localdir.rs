use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use async_trait::async_trait;
use satchel_plugin::{BackendError, PluginBackend, RemoteFile};
use tokio::sync::Mutex;
use url::Url;

/// Backend that serves a directory on the local filesystem. Useful on its
/// own for removable media and as the stand-in backend in development:
/// it exercises the whole session, watcher, and cache machinery without
/// any network.
///
/// File ids are root-relative slash paths; the empty id is the root
/// folder itself.
pub struct LocalDirBackend {
    root: PathBuf,
    cache_root: PathBuf,
    connected: AtomicBool,
    account: Mutex<Option<String>>,
}

impl LocalDirBackend {
    pub fn new(root: PathBuf, cache_root: PathBuf) -> Self {
        Self {
            root,
            cache_root,
            connected: AtomicBool::new(false),
            account: Mutex::new(None),
        }
    }

    pub fn root_file() -> RemoteFile {
        RemoteFile::folder("", "/")
    }

    fn resolve(&self, id: &str) -> Result<PathBuf, BackendError> {
        Ok(self.root.join(sanitize(id)?))
    }

    fn resolve_cache(&self, id: &str) -> Result<PathBuf, BackendError> {
        Ok(self.cache_root.join(sanitize(id)?))
    }

    fn child_id(parent: &RemoteFile, name: &str) -> String {
        if parent.id.is_empty() {
            name.to_string()
        } else {
            format!("{}/{name}", parent.id)
        }
    }

    fn entry_parent(parent: &RemoteFile) -> Option<String> {
        if parent.id.is_empty() {
            None
        } else {
            Some(parent.id.clone())
        }
    }
}

/// Rejects ids that would escape the served root.
fn sanitize(id: &str) -> Result<PathBuf, BackendError> {
    let relative = Path::new(id);
    for component in relative.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(BackendError::msg(format!("invalid file id: {id}")));
            }
        }
    }
    Ok(relative.to_path_buf())
}

fn local_url(path: &Path) -> Result<Url, BackendError> {
    Url::from_file_path(path)
        .map_err(|_| BackendError::msg(format!("not an absolute path: {}", path.display())))
}

fn url_to_path(url: &Url) -> Result<PathBuf, BackendError> {
    if url.scheme() != "file" {
        return Err(BackendError::msg(format!("unsupported url scheme: {url}")));
    }
    url.to_file_path()
        .map_err(|_| BackendError::msg(format!("unusable file url: {url}")))
}

#[async_trait]
impl PluginBackend for LocalDirBackend {
    async fn authentication_needed(&self) -> bool {
        false
    }

    async fn connect(&self) -> Result<(), BackendError> {
        let metadata = tokio::fs::metadata(&self.root)
            .await
            .with_context(|| format!("root {} is unavailable", self.root.display()))
            .map_err(BackendError::from)?;
        if !metadata.is_dir() {
            return Err(BackendError::msg(format!(
                "root {} is not a directory",
                self.root.display()
            )));
        }
        tokio::fs::create_dir_all(&self.cache_root).await?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BackendError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Copies the file into the cache and hands back a local url; edits
    /// land on the cached copy and flow back through `upload`.
    async fn open_file(&self, file: &RemoteFile) -> Result<Url, BackendError> {
        let source = self.resolve(&file.id)?;
        let cached = self.resolve_cache(&file.id)?;
        if let Some(parent) = cached.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&source, &cached)
            .await
            .with_context(|| format!("failed to cache {}", source.display()))
            .map_err(BackendError::from)?;
        local_url(&cached)
    }

    async fn upload(&self, source: &Url, dest: &RemoteFile) -> Result<RemoteFile, BackendError> {
        let source = url_to_path(source)?;
        let target = self.resolve(&dest.id)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&source, &target)
            .await
            .with_context(|| format!("failed to store {}", target.display()))
            .map_err(BackendError::from)?;
        Ok(dest.clone())
    }

    async fn download(&self, source: &RemoteFile, dest: &Url) -> Result<Url, BackendError> {
        let from = self.resolve(&source.id)?;
        let to = url_to_path(dest)?;
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&from, &to)
            .await
            .with_context(|| format!("failed to download {}", from.display()))
            .map_err(BackendError::from)?;
        local_url(&to)
    }

    async fn list_files(&self, parent: &RemoteFile) -> Result<Vec<RemoteFile>, BackendError> {
        let dir = self.resolve(&parent.id)?;
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .with_context(|| format!("failed to list {}", dir.display()))
            .map_err(BackendError::from)?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let id = Self::child_id(parent, &name);
            let is_dir = entry.file_type().await?.is_dir();
            let file = if is_dir {
                RemoteFile::folder(id, &name)
            } else {
                RemoteFile::file(id, &name)
            };
            files.push(match Self::entry_parent(parent) {
                Some(parent_id) => file.with_parent(parent_id),
                None => file,
            });
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    async fn make_file(&self, name: &str, parent: &RemoteFile) -> Result<RemoteFile, BackendError> {
        let id = Self::child_id(parent, name);
        let path = self.resolve(&id)?;
        tokio::fs::File::create(&path)
            .await
            .with_context(|| format!("failed to create {}", path.display()))
            .map_err(BackendError::from)?;
        let file = RemoteFile::file(id, name);
        Ok(match Self::entry_parent(parent) {
            Some(parent_id) => file.with_parent(parent_id),
            None => file,
        })
    }

    async fn make_folder(
        &self,
        name: &str,
        parent: &RemoteFile,
    ) -> Result<RemoteFile, BackendError> {
        let id = Self::child_id(parent, name);
        let path = self.resolve(&id)?;
        tokio::fs::create_dir(&path)
            .await
            .with_context(|| format!("failed to create {}", path.display()))
            .map_err(BackendError::from)?;
        let folder = RemoteFile::folder(id, name);
        Ok(match Self::entry_parent(parent) {
            Some(parent_id) => folder.with_parent(parent_id),
            None => folder,
        })
    }

    async fn copy(&self, source: &RemoteFile, dest: &RemoteFile) -> Result<RemoteFile, BackendError> {
        if source.is_dir {
            return Err(BackendError::msg("copying folders is not supported"));
        }
        let from = self.resolve(&source.id)?;
        let id = Self::child_id(dest, &source.name);
        let to = self.resolve(&id)?;
        tokio::fs::copy(&from, &to)
            .await
            .with_context(|| format!("failed to copy {}", from.display()))
            .map_err(BackendError::from)?;
        Ok(RemoteFile::file(id, &source.name).with_parent(&dest.id))
    }

    async fn remove(&self, file: &RemoteFile) -> Result<bool, BackendError> {
        let path = self.resolve(&file.id)?;
        let result = if file.is_dir {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        match result {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(BackendError::from(err)),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool, BackendError> {
        let resolved = self.resolve(path)?;
        Ok(tokio::fs::try_exists(&resolved).await?)
    }

    async fn chmod(&self, permissions: u32, target: &RemoteFile) -> Result<(), BackendError> {
        use std::os::unix::fs::PermissionsExt;

        let path = self.resolve(&target.id)?;
        let perms = std::fs::Permissions::from_mode(permissions);
        tokio::fs::set_permissions(&path, perms)
            .await
            .with_context(|| format!("failed to chmod {}", path.display()))
            .map_err(BackendError::from)
    }

    async fn chown(&self, _uid: u32, _target: &RemoteFile) -> Result<(), BackendError> {
        Err(BackendError::msg(
            "changing ownership is not supported by the local backend",
        ))
    }

    async fn set_current_account(&self, account_id: &str) -> Result<(), BackendError> {
        *self.account.lock().await = Some(account_id.to_string());
        Ok(())
    }

    async fn get_current_account(&self) -> Option<String> {
        self.account.lock().await.clone()
    }

    async fn remove_account(&self, account_id: &str) -> Result<(), BackendError> {
        let mut account = self.account.lock().await;
        if account.as_deref() == Some(account_id) {
            *account = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn backend(dir: &Path) -> LocalDirBackend {
        LocalDirBackend::new(dir.join("root"), dir.join("cache"))
    }

    async fn connected_backend(dir: &Path) -> LocalDirBackend {
        std::fs::create_dir_all(dir.join("root")).unwrap();
        let backend = backend(dir);
        backend.connect().await.unwrap();
        backend
    }

    #[tokio::test]
    async fn connect_requires_an_existing_root_directory() {
        let dir = tempdir().unwrap();
        let backend = backend(dir.path());
        assert!(backend.connect().await.is_err());
        assert!(!backend.is_connected().await);

        std::fs::create_dir_all(dir.path().join("root")).unwrap();
        backend.connect().await.unwrap();
        assert!(backend.is_connected().await);
        assert!(dir.path().join("cache").is_dir());
    }

    #[tokio::test]
    async fn ids_cannot_escape_the_root() {
        let dir = tempdir().unwrap();
        let backend = connected_backend(dir.path()).await;
        assert!(backend.exists("../outside").await.is_err());
        assert!(backend.exists("/etc/passwd").await.is_err());
    }

    #[tokio::test]
    async fn open_file_caches_a_copy_and_upload_writes_it_back() {
        let dir = tempdir().unwrap();
        let backend = connected_backend(dir.path()).await;
        std::fs::write(dir.path().join("root/a.txt"), b"original").unwrap();

        let file = RemoteFile::file("a.txt", "a.txt");
        let url = backend.open_file(&file).await.unwrap();
        let cached = url.to_file_path().unwrap();
        assert_eq!(std::fs::read(&cached).unwrap(), b"original");

        std::fs::write(&cached, b"edited").unwrap();
        backend.upload(&url, &file).await.unwrap();
        assert_eq!(
            std::fs::read(dir.path().join("root/a.txt")).unwrap(),
            b"edited"
        );
    }

    #[tokio::test]
    async fn list_files_reports_sorted_entries_under_the_parent() {
        let dir = tempdir().unwrap();
        let backend = connected_backend(dir.path()).await;
        std::fs::create_dir(dir.path().join("root/docs")).unwrap();
        std::fs::write(dir.path().join("root/docs/b.txt"), b"b").unwrap();
        std::fs::write(dir.path().join("root/docs/a.txt"), b"a").unwrap();

        let parent = RemoteFile::folder("docs", "docs");
        let files = backend.list_files(&parent).await.unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].id, "docs/a.txt");
        assert_eq!(files[0].parent.as_deref(), Some("docs"));
        assert_eq!(files[1].id, "docs/b.txt");
    }

    #[tokio::test]
    async fn listing_the_root_leaves_parent_unset() {
        let dir = tempdir().unwrap();
        let backend = connected_backend(dir.path()).await;
        std::fs::write(dir.path().join("root/a.txt"), b"a").unwrap();

        let files = backend.list_files(&LocalDirBackend::root_file()).await.unwrap();
        assert_eq!(files[0].id, "a.txt");
        assert_eq!(files[0].parent, None);
    }

    #[tokio::test]
    async fn make_and_remove_round_trip() {
        let dir = tempdir().unwrap();
        let backend = connected_backend(dir.path()).await;
        let root = LocalDirBackend::root_file();

        let folder = backend.make_folder("docs", &root).await.unwrap();
        assert!(folder.is_dir);
        let file = backend.make_file("a.txt", &folder).await.unwrap();
        assert_eq!(file.id, "docs/a.txt");
        assert!(dir.path().join("root/docs/a.txt").is_file());

        assert!(backend.remove(&file).await.unwrap());
        assert!(!backend.remove(&file).await.unwrap());
    }

    #[tokio::test]
    async fn copy_rejects_folders() {
        let dir = tempdir().unwrap();
        let backend = connected_backend(dir.path()).await;
        let folder = RemoteFile::folder("docs", "docs");
        let err = backend
            .copy(&folder, &LocalDirBackend::root_file())
            .await
            .expect_err("folder copy must fail");
        assert!(err.to_string().contains("not supported"));
    }

    #[tokio::test]
    async fn chmod_applies_the_requested_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let backend = connected_backend(dir.path()).await;
        std::fs::write(dir.path().join("root/a.txt"), b"a").unwrap();

        backend
            .chmod(0o600, &RemoteFile::file("a.txt", "a.txt"))
            .await
            .unwrap();
        let mode = std::fs::metadata(dir.path().join("root/a.txt"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn account_bookkeeping_clears_only_the_matching_account() {
        let dir = tempdir().unwrap();
        let backend = connected_backend(dir.path()).await;
        backend.set_current_account("acct-1").await.unwrap();

        backend.remove_account("acct-2").await.unwrap();
        assert_eq!(backend.get_current_account().await.as_deref(), Some("acct-1"));

        backend.remove_account("acct-1").await.unwrap();
        assert_eq!(backend.get_current_account().await, None);
    }
}
