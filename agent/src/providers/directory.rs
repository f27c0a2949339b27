//! Where artifacts live on disk

use std::path::PathBuf;

/// Resolves the storage root; artifacts go to `root/artifacts/<actionId>/<md5>`
pub trait DirectoryProvider: Send + Sync {
    fn root(&self) -> PathBuf;

    fn artifacts_dir(&self) -> PathBuf {
        self.root().join("artifacts")
    }

    fn action_dir(&self, action_id: &str) -> PathBuf {
        self.artifacts_dir().join(action_id)
    }
}
