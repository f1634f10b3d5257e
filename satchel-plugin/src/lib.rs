mod backend;
mod file;

pub use backend::{BackendError, PluginBackend};
pub use file::RemoteFile;
