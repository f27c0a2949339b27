//! DDI update client - Entry Point
//!
//! Polls the controller server for deployments and installs them with the
//! configured update command.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use ddi_agent::app::run::{run, ClientDeps};
use ddi_agent::filesys::file::File;
use ddi_agent::http::HttpClient;
use ddi_agent::logs::{init_logging, LogOptions};
use ddi_agent::providers::{Authorizations, CommandUpdater, ExponentialRetry, StaticConfigData};
use ddi_agent::storage::layout::StorageLayout;
use ddi_agent::storage::settings::Settings;
use ddi_agent::utils::version_info;

use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(text) => println!("{}", text),
            Err(_) => println!("{}", version.version),
        }
        return;
    }

    // Retrieve the settings file
    let default_layout = StorageLayout::default();
    let settings_file = match cli_args.get("settings") {
        Some(path) => File::new(PathBuf::from(path)),
        None => default_layout.settings_file(),
    };
    let settings = if settings_file.exists().await {
        match settings_file.read_json::<Settings>().await {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("Unable to read settings file {:?}: {}", settings_file.path(), e);
                return;
            }
        }
    } else {
        Settings::default()
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level,
        json_format: settings.log_json,
        log_dir: settings.log_dir.clone(),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    let layout = match &settings.storage_root {
        Some(root) => StorageLayout::new(root.clone()),
        None => default_layout,
    };
    if let Err(e) = layout.setup().await {
        error!("Unable to prepare storage at {:?}: {}", layout.base_dir, e);
        return;
    }

    let transport = match HttpClient::new(&settings.http_options()) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Invalid server configuration: {}", e);
            return;
        }
    };

    let updater = CommandUpdater::new(
        settings.update_command.program.clone(),
        settings.update_command.args.clone(),
    )
    .cancellable(settings.update_command.cancellable);

    let deps = ClientDeps {
        transport,
        directories: Arc::new(layout),
        config_data: Arc::new(StaticConfigData::new(settings.attributes.clone())),
        authorizations: Authorizations::default(),
        retry_policy: Arc::new(ExponentialRetry::default()),
        updaters: vec![Arc::new(updater)],
        listeners: Vec::new(),
    };

    let options = settings.client_options();
    info!(
        "Running DDI update client {} against {} as {}",
        version.version, settings.server.url, settings.server.controller_id
    );
    if let Err(e) = run(options, deps, await_shutdown_signal()).await {
        error!("Failed to run the update client: {e}");
        std::process::exit(1);
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("Failed to listen for SIGTERM");
        let mut sigint = signal(SignalKind::interrupt()).expect("Failed to listen for SIGINT");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
        info!("Ctrl+C received, shutting down...");
    }
}
