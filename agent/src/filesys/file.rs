//! File operations

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use md5::Md5;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::errors::AgentError;

const READ_CHUNK: usize = 64 * 1024;

/// Hex digests of a file's content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigests {
    pub md5: String,
    pub sha256: String,
}

/// A file wrapper with path
#[derive(Debug, Clone)]
pub struct File {
    path: PathBuf,
}

impl File {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the file exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// Read file as JSON
    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T, AgentError> {
        let contents = fs::read_to_string(&self.path).await?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Write string to file, creating the parent directory
    pub async fn write_string(&self, contents: &str) -> Result<(), AgentError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&self.path).await?;
        file.write_all(contents.as_bytes()).await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Delete the file; a missing file is not an error
    pub async fn delete(&self) -> Result<(), AgentError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Move to `target`, replacing it
    pub async fn rename_to(&self, target: &Path) -> Result<File, AgentError> {
        fs::rename(&self.path, target).await?;
        Ok(File::new(target))
    }

    /// MD5 and SHA-256 of the content, computed in one streaming pass
    pub async fn digests(&self) -> Result<FileDigests, AgentError> {
        let mut file = fs::File::open(&self.path).await?;
        let mut md5 = Md5::new();
        let mut sha256 = Sha256::new();
        let mut buf = vec![0u8; READ_CHUNK];

        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            md5.update(&buf[..n]);
            sha256.update(&buf[..n]);
        }

        Ok(FileDigests {
            md5: hex::encode(md5.finalize()),
            sha256: hex::encode(sha256.finalize()),
        })
    }
}
