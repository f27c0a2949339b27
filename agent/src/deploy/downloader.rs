//! Download and verification of a single artifact
//!
//! `Idle → Downloading → Verifying → Done`, with `RetryWait` between failed
//! attempts and `Exhausted` once the retry policy gives up. An artifact already
//! present at its final path is verified first and only downloaded again when
//! its content does not match.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::download::DownloadMsg;
use crate::actor::{Actor, ActorRef, Context};
use crate::errors::AgentError;
use crate::events::{ClientEvent, HubRef};
use crate::filesys::file::File;
use crate::http::DdiTransport;
use crate::models::deployment::FileToDownload;
use crate::providers::{DownloadRetryPolicy, RetryVerdict};
use crate::utils::digest_eq;

const TRANSFER_TASK: &str = "transfer";
const VERIFY_TASK: &str = "verify";
const RETRY_TIMER: &str = "retry";

/// Downloader options
#[derive(Debug, Clone)]
pub struct Options {
    /// Minimum time between progress notifications
    pub progress_interval: Duration,

    /// Percentage step between progress reports to the orchestrator
    pub progress_step: u8,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            progress_interval: Duration::from_secs(1),
            progress_step: 10,
        }
    }
}

/// What a downloader tells its orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileReport {
    Success { md5: String },
    AlreadyDownloaded { md5: String },
    Info { md5: String, message: String },
    Progress { md5: String, percent: u8 },
    Error { md5: String, messages: Vec<String> },
}

#[derive(Debug)]
pub enum DownloaderMsg {
    Start,
    Retry,
    Progress { downloaded: u64 },
    Transferred(Result<(), String>),
    Verified {
        existing: bool,
        outcome: Result<(), String>,
    },
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Downloading,
    Verifying { existing: bool },
    RetryWait,
    Done,
    Exhausted,
}

pub struct FileDownloader {
    file: FileToDownload,
    transport: Arc<dyn DdiTransport>,
    policy: Arc<dyn DownloadRetryPolicy>,
    hub: HubRef,
    parent: ActorRef<DownloadMsg>,
    options: Options,
    state: State,
    attempt: u32,
    errors: Vec<String>,
    reported_step: u8,
}

impl FileDownloader {
    pub fn new(
        file: FileToDownload,
        transport: Arc<dyn DdiTransport>,
        policy: Arc<dyn DownloadRetryPolicy>,
        hub: HubRef,
        parent: ActorRef<DownloadMsg>,
        options: Options,
    ) -> Self {
        Self {
            file,
            transport,
            policy,
            hub,
            parent,
            options,
            state: State::Idle,
            attempt: 0,
            errors: Vec::new(),
            reported_step: 0,
        }
    }

    async fn report(&self, report: FileReport) {
        self.parent.send(DownloadMsg::File(report)).await;
    }

    fn begin_transfer(&mut self, ctx: &mut Context<DownloaderMsg>) {
        self.state = State::Downloading;
        self.reported_step = 0;
        let file = self.file.clone();
        let transport = self.transport.clone();
        let me = ctx.myself();
        let interval = self.options.progress_interval;
        ctx.spawn_task(TRANSFER_TASK, async move {
            let result = transfer(transport.as_ref(), &file, &me, interval)
                .await
                .map_err(|e| e.to_string());
            me.send(DownloaderMsg::Transferred(result)).await;
        });
    }

    fn begin_verify(&mut self, ctx: &mut Context<DownloaderMsg>, existing: bool) {
        self.state = State::Verifying { existing };
        let file = self.file.clone();
        let me = ctx.myself();
        ctx.spawn_task(VERIFY_TASK, async move {
            let outcome = verify(&file, existing).await.map_err(|e| e.to_string());
            me.send(DownloaderMsg::Verified { existing, outcome }).await;
        });
    }

    async fn on_progress(&mut self, downloaded: u64) {
        self.hub
            .send(
                ClientEvent::FileDownloadProgress {
                    file_name: self.file.file_name.clone(),
                    downloaded,
                    size: self.file.size,
                }
                .into(),
            )
            .await;

        if self.file.size == 0 || self.options.progress_step == 0 {
            return;
        }
        let percent = (downloaded.saturating_mul(100) / self.file.size).min(100) as u8;
        let step = percent - percent % self.options.progress_step;
        if step > self.reported_step {
            self.reported_step = step;
            self.report(FileReport::Progress {
                md5: self.file.md5.clone(),
                percent: step,
            })
            .await;
        }
    }

    async fn finish(&mut self, ctx: &mut Context<DownloaderMsg>, report: FileReport) {
        info!(file = %self.file.file_name, md5 = %self.file.md5, "Artifact ready");
        self.state = State::Done;
        self.hub
            .send(
                ClientEvent::FileDownloadFinished {
                    file_name: self.file.file_name.clone(),
                }
                .into(),
            )
            .await;
        self.report(report).await;
        ctx.stop();
    }

    async fn fail(&mut self, ctx: &mut Context<DownloaderMsg>, error: String) {
        self.attempt = self.attempt.saturating_add(1);
        warn!(file = %self.file.file_name, attempt = self.attempt, error = %error, "Download attempt failed");
        self.errors.push(error.clone());

        match self.policy.on_attempt(self.attempt, &self.file.md5, &error) {
            RetryVerdict::Stop => {
                self.state = State::Exhausted;
                self.report(FileReport::Error {
                    md5: self.file.md5.clone(),
                    messages: self.errors.clone(),
                })
                .await;
                ctx.stop();
            }
            RetryVerdict::Wait(delay) => {
                if self.attempt > 1 {
                    self.report(FileReport::Info {
                        md5: self.file.md5.clone(),
                        message: format!(
                            "Retry {} of {} in {}s after: {}",
                            self.attempt,
                            self.file.file_name,
                            delay.as_secs(),
                            error
                        ),
                    })
                    .await;
                }
                self.state = State::RetryWait;
                ctx.schedule_once(RETRY_TIMER, delay, DownloaderMsg::Retry);
            }
        }
    }
}

#[async_trait]
impl Actor for FileDownloader {
    type Msg = DownloaderMsg;

    async fn handle(
        &mut self,
        ctx: &mut Context<DownloaderMsg>,
        msg: DownloaderMsg,
    ) -> Result<(), AgentError> {
        match (self.state, msg) {
            (State::Idle, DownloaderMsg::Start) => {
                self.hub
                    .send(
                        ClientEvent::FileDownloadStarted {
                            action_id: self.file.action_id.clone(),
                            file_name: self.file.file_name.clone(),
                        }
                        .into(),
                    )
                    .await;
                if File::new(self.file.final_path()).exists().await {
                    debug!(file = %self.file.file_name, "Artifact present, verifying");
                    self.begin_verify(ctx, true);
                } else {
                    self.begin_transfer(ctx);
                }
            }
            (State::RetryWait, DownloaderMsg::Retry) => self.begin_transfer(ctx),
            (State::Downloading, DownloaderMsg::Progress { downloaded }) => {
                self.on_progress(downloaded).await;
            }
            (State::Downloading, DownloaderMsg::Transferred(Ok(()))) => {
                self.begin_verify(ctx, false);
            }
            (State::Downloading, DownloaderMsg::Transferred(Err(error))) => {
                self.fail(ctx, error).await;
            }
            (State::Verifying { existing: true }, DownloaderMsg::Verified { outcome, .. }) => {
                match outcome {
                    Ok(()) => {
                        let md5 = self.file.md5.clone();
                        self.finish(ctx, FileReport::AlreadyDownloaded { md5 }).await;
                    }
                    Err(error) => {
                        info!(file = %self.file.file_name, error = %error, "Present artifact rejected, downloading again");
                        self.begin_transfer(ctx);
                    }
                }
            }
            (State::Verifying { existing: false }, DownloaderMsg::Verified { outcome, .. }) => {
                match outcome {
                    Ok(()) => {
                        let md5 = self.file.md5.clone();
                        self.finish(ctx, FileReport::Success { md5 }).await;
                    }
                    Err(error) => self.fail(ctx, error).await,
                }
            }
            (_, DownloaderMsg::Stop) => {
                debug!(file = %self.file.file_name, "Download stopped");
                ctx.cancel_task(TRANSFER_TASK);
                ctx.cancel_task(VERIFY_TASK);
                ctx.cancel_task(RETRY_TIMER);
                ctx.stop();
            }
            (state, msg) => {
                debug!(?state, ?msg, file = %self.file.file_name, "Ignoring message");
            }
        }
        Ok(())
    }
}

/// Stream the artifact into its temporary file
async fn transfer(
    transport: &dyn DdiTransport,
    file: &FileToDownload,
    me: &ActorRef<DownloaderMsg>,
    interval: Duration,
) -> Result<(), AgentError> {
    let url = file.url.as_deref().ok_or_else(|| {
        AgentError::DownloadError(format!("no download link for {}", file.file_name))
    })?;

    fs::create_dir_all(&file.folder).await?;
    let mut stream = transport.download_artifact(url).await?;
    let mut out = fs::File::create(file.temp_path()).await?;

    let mut downloaded: u64 = 0;
    let mut last_report = Instant::now();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        out.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
        if last_report.elapsed() >= interval {
            last_report = Instant::now();
            me.send(DownloaderMsg::Progress { downloaded }).await;
        }
    }
    out.flush().await?;
    out.sync_all().await?;
    me.send(DownloaderMsg::Progress { downloaded }).await;

    debug!(file = %file.file_name, bytes = downloaded, "Transfer complete");
    Ok(())
}

/// Check the content hashes; on success the temporary file becomes the final one
async fn verify(file: &FileToDownload, existing: bool) -> Result<(), AgentError> {
    let target = if existing {
        File::new(file.final_path())
    } else {
        File::new(file.temp_path())
    };

    let digests = target.digests().await?;
    let mismatch = if !digest_eq(&file.md5, &digests.md5) {
        Some(format!(
            "MD5 mismatch for {}: expected {}, got {}",
            file.file_name, file.md5, digests.md5
        ))
    } else {
        match &file.sha256 {
            Some(expected) if !digest_eq(expected, &digests.sha256) => Some(format!(
                "SHA-256 mismatch for {}: expected {}, got {}",
                file.file_name, expected, digests.sha256
            )),
            _ => None,
        }
    };

    if let Some(message) = mismatch {
        target.delete().await?;
        return Err(AgentError::Integrity(message));
    }

    if !existing {
        target.rename_to(&file.final_path()).await?;
    }
    File::new(file.sidecar_path())
        .write_string(&digests.md5)
        .await?;
    Ok(())
}

/// Whether the artifact is on disk with matching content
pub async fn is_present(file: &FileToDownload) -> bool {
    let target = File::new(file.final_path());
    if !target.exists().await {
        return false;
    }
    match target.digests().await {
        Ok(digests) => {
            digest_eq(&file.md5, &digests.md5)
                && file
                    .sha256
                    .as_ref()
                    .is_none_or(|expected| digest_eq(expected, &digests.sha256))
        }
        Err(_) => false,
    }
}
