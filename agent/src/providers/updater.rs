//! Software module installers

use async_trait::async_trait;
use ddi_models::Chunk;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::deploy::update::Messenger;
use crate::models::deployment::{ModuleKey, ResolvedModule};

const MAX_OUTPUT_LINES: usize = 10;

/// Modules an updater claims and the order it applies in (lower first)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSelection {
    pub priority: i32,
    pub modules: Vec<ModuleKey>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateResult {
    pub success: bool,
    pub details: Vec<String>,
}

impl UpdateResult {
    pub fn success(details: Vec<String>) -> Self {
        Self {
            success: true,
            details,
        }
    }

    pub fn failure(details: Vec<String>) -> Self {
        Self {
            success: false,
            details,
        }
    }
}

#[async_trait]
pub trait Updater: Send + Sync {
    fn name(&self) -> &str;

    /// Claims every chunk at priority 0 unless overridden
    fn requirements(&self, chunks: &[Chunk]) -> ModuleSelection {
        ModuleSelection {
            priority: 0,
            modules: chunks.iter().map(ModuleKey::from).collect(),
        }
    }

    fn is_cancellable(&self) -> bool {
        true
    }

    /// Apply the claimed modules. `messenger` forwards progress text to the server.
    async fn apply(&self, modules: Vec<ResolvedModule>, messenger: Messenger) -> UpdateResult;
}

/// Runs an external program with the resolved artifact paths appended to its arguments
#[derive(Debug, Clone)]
pub struct CommandUpdater {
    name: String,
    program: String,
    args: Vec<String>,
    /// Only claim chunks of this type
    part: Option<String>,
    priority: i32,
    cancellable: bool,
}

impl CommandUpdater {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        let program = program.into();
        Self {
            name: format!("command:{}", program),
            program,
            args,
            part: None,
            priority: 0,
            cancellable: true,
        }
    }

    pub fn for_part(mut self, part: impl Into<String>) -> Self {
        self.part = Some(part.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn cancellable(mut self, cancellable: bool) -> Self {
        self.cancellable = cancellable;
        self
    }
}

fn tail_lines(output: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(output);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(MAX_OUTPUT_LINES);
    lines[start..].iter().map(|l| l.to_string()).collect()
}

#[async_trait]
impl Updater for CommandUpdater {
    fn name(&self) -> &str {
        &self.name
    }

    fn requirements(&self, chunks: &[Chunk]) -> ModuleSelection {
        let modules = chunks
            .iter()
            .filter(|chunk| self.part.as_ref().is_none_or(|part| *part == chunk.part))
            .map(ModuleKey::from)
            .collect();
        ModuleSelection {
            priority: self.priority,
            modules,
        }
    }

    fn is_cancellable(&self) -> bool {
        self.cancellable
    }

    async fn apply(&self, modules: Vec<ResolvedModule>, messenger: Messenger) -> UpdateResult {
        let paths: Vec<String> = modules
            .iter()
            .flat_map(|module| module.artifacts.iter())
            .map(|artifact| artifact.path.to_string_lossy().into_owned())
            .collect();

        info!(program = %self.program, artifacts = paths.len(), "Running update command");
        messenger
            .send(format!("Running {} for {} module(s)", self.program, modules.len()))
            .await;

        let output = match Command::new(&self.program)
            .args(&self.args)
            .args(&paths)
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                warn!(program = %self.program, error = %e, "Failed to start update command");
                return UpdateResult::failure(vec![format!("Failed to run {}: {}", self.program, e)]);
            }
        };

        let mut details = tail_lines(&output.stdout);
        details.extend(tail_lines(&output.stderr));
        details.push(format!("{} exited with {}", self.program, output.status));
        debug!(program = %self.program, status = %output.status, "Update command finished");

        if output.status.success() {
            UpdateResult::success(details)
        } else {
            UpdateResult::failure(details)
        }
    }
}
