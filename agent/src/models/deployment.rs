//! Deployment models

use std::path::PathBuf;

use ddi_models::{Artifact, Chunk};
pub use ddi_models::{CancelDescriptor, DeploymentDescriptor, ProvisioningType};

/// Identity an updater uses to claim a chunk: type, name and version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleKey {
    pub part: String,
    pub name: String,
    pub version: String,
}

impl ModuleKey {
    pub fn new(part: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            part: part.into(),
            name: name.into(),
            version: version.into(),
        }
    }

    pub fn matches(&self, chunk: &Chunk) -> bool {
        self.part == chunk.part && self.name == chunk.name && self.version == chunk.version
    }
}

impl From<&Chunk> for ModuleKey {
    fn from(chunk: &Chunk) -> Self {
        Self::new(&chunk.part, &chunk.name, &chunk.version)
    }
}

/// Artifact with its location on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArtifact {
    pub artifact: Artifact,
    pub path: PathBuf,
}

/// Claimed chunk handed to an updater
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModule {
    pub chunk: Chunk,
    pub artifacts: Vec<ResolvedArtifact>,
}

/// One artifact a deployment needs on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileToDownload {
    pub action_id: String,
    pub file_name: String,
    pub md5: String,
    pub sha256: Option<String>,
    pub url: Option<String>,
    pub size: u64,
    /// Per-action artifact folder
    pub folder: PathBuf,
}

impl FileToDownload {
    pub fn from_artifact(action_id: &str, artifact: &Artifact, folder: PathBuf) -> Self {
        Self {
            action_id: action_id.to_string(),
            file_name: artifact.filename.clone(),
            md5: artifact.hashes.md5.to_lowercase(),
            sha256: artifact.hashes.sha256.as_ref().map(|h| h.to_lowercase()),
            url: artifact.download_url().map(str::to_string),
            size: artifact.size,
            folder,
        }
    }

    /// Verified artifact, named after its MD5
    pub fn final_path(&self) -> PathBuf {
        self.folder.join(&self.md5)
    }

    /// In-progress transfer
    pub fn temp_path(&self) -> PathBuf {
        self.folder.join(format!("{}.part", self.md5))
    }

    /// Digest recorded next to the verified artifact
    pub fn sidecar_path(&self) -> PathBuf {
        self.folder.join(format!("{}.md5", self.md5))
    }
}
