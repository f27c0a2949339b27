//! Matching updaters against the chunks of a deployment

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use ddi_models::{Artifact, Chunk};

use crate::providers::Updater;

/// Chunks one updater claimed, with its priority
#[derive(Clone)]
pub struct Assignment {
    pub updater: Arc<dyn Updater>,
    pub priority: i32,
    pub chunks: Vec<Chunk>,
}

impl fmt::Debug for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Assignment")
            .field("updater", &self.updater.name())
            .field("priority", &self.priority)
            .field("chunks", &self.chunks.len())
            .finish()
    }
}

/// Updaters in registration order
#[derive(Clone, Default)]
pub struct UpdaterRegistry {
    updaters: Vec<Arc<dyn Updater>>,
}

impl UpdaterRegistry {
    pub fn new(updaters: Vec<Arc<dyn Updater>>) -> Self {
        Self { updaters }
    }

    /// Claims of every updater, ascending priority. Equal priorities keep registration order.
    pub fn resolve(&self, chunks: &[Chunk]) -> Vec<Assignment> {
        let mut assignments: Vec<Assignment> = self
            .updaters
            .iter()
            .map(|updater| {
                let selection = updater.requirements(chunks);
                let claimed = chunks
                    .iter()
                    .filter(|chunk| selection.modules.iter().any(|key| key.matches(chunk)))
                    .cloned()
                    .collect();
                Assignment {
                    updater: updater.clone(),
                    priority: selection.priority,
                    chunks: claimed,
                }
            })
            .collect();
        assignments.sort_by_key(|a| a.priority);
        assignments
    }

    /// Artifacts of every claimed chunk, deduplicated by MD5
    pub fn required_artifacts(&self, chunks: &[Chunk]) -> Vec<Artifact> {
        let mut seen = HashSet::new();
        self.resolve(chunks)
            .iter()
            .flat_map(|a| a.chunks.iter())
            .flat_map(|chunk| chunk.artifacts.iter())
            .filter(|artifact| seen.insert(artifact.hashes.md5.to_lowercase()))
            .cloned()
            .collect()
    }

    /// True only if every updater can be cancelled
    pub fn all_cancellable(&self) -> bool {
        self.updaters.iter().all(|u| u.is_cancellable())
    }
}
