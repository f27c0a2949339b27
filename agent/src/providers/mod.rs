//! Pluggable capabilities consumed by the orchestration core

pub mod authorization;
pub mod config_data;
pub mod directory;
pub mod retry;
pub mod updater;

pub use authorization::{AlwaysGrant, AuthorizationProvider, Authorizations, PermitRequest, Phase};
pub use config_data::{ConfigDataProvider, StaticConfigData};
pub use directory::DirectoryProvider;
pub use retry::{DownloadRetryPolicy, ExponentialRetry, RetryVerdict};
pub use updater::{CommandUpdater, ModuleSelection, UpdateResult, Updater};
