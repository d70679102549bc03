//! pkgdeploy command line entry point.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pkgdeploy_client::{ClientConfig, PackageClient, PackageInfo, SessionEvent};
use pkgdeploy_operations::{OperationClientConfig, OperationKind};
use pkgdeploy_progress::ProgressEvent;
use pkgdeploy_upload_channel::{ChannelConfig, HttpTokenRefresher, TokenManager, TokenRefresher};

use crate::config::AppConfig;

#[derive(Debug, Parser)]
#[command(name = "pkgdeploy", version, about = "Upload, install and uninstall packages")]
struct Cli {
    /// Configuration file (default: ~/.config/pkgdeploy/client.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Install / uninstall API root.
    #[arg(long, global = true)]
    server: Option<String>,

    /// Upload WebSocket endpoint.
    #[arg(long, global = true)]
    upload_url: Option<String>,

    /// Bearer token.
    #[arg(long, global = true, env = "PKGDEPLOY_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Upload a package file (.dmg, .pkg, .app, .zip).
    Upload {
        path: PathBuf,
        #[arg(long)]
        category: String,
        #[arg(long)]
        pkg_version: String,
        /// Display name (default: file name without extension).
        #[arg(long)]
        name: Option<String>,
    },
    /// Install a package on the execution host.
    Install { package_id: String },
    /// Uninstall a package from the execution host.
    Uninstall { package_id: String },
}

fn client_config(cli: &Cli, app: &AppConfig) -> ClientConfig {
    let server = cli.server.clone().unwrap_or_else(|| app.server_url.clone());
    let upload_url = cli.upload_url.clone().unwrap_or_else(|| app.upload_url.clone());
    ClientConfig {
        channel: ChannelConfig::new(upload_url),
        operations: OperationClientConfig::new(server),
    }
}

fn token_manager(cli: &Cli, app: &AppConfig) -> anyhow::Result<TokenManager> {
    let token = cli
        .token
        .clone()
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| app.access_token.clone());

    let refresher: Option<Arc<dyn TokenRefresher>> = if app.refresh_enabled() {
        Some(Arc::new(HttpTokenRefresher::new(
            app.refresh_endpoint.clone(),
            app.refresh_token.clone(),
        )))
    } else {
        None
    };

    if token.is_empty() && refresher.is_none() {
        bail!("no access token: pass --token, set PKGDEPLOY_TOKEN, or configure one");
    }
    Ok(TokenManager::new(token, refresher))
}

async fn run_upload(
    client: &PackageClient,
    path: PathBuf,
    info: PackageInfo,
) -> anyhow::Result<()> {
    let mut controller = client.upload_controller();
    let mut events = controller
        .take_events()
        .context("upload events already taken")?;
    let controller = Arc::new(controller);

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Progress {
                    phase,
                    display_percent,
                    message,
                    ..
                } => println!("[{phase:>12}] {display_percent:5.1}%  {message}"),
                SessionEvent::Completed { .. } => println!("upload complete"),
                SessionEvent::Failed { error } => eprintln!("upload failed: {error}"),
                SessionEvent::Cancelled => eprintln!("upload cancelled"),
            }
        }
    });

    let interrupt = tokio::spawn({
        let controller = Arc::clone(&controller);
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                controller.cancel();
            }
        }
    });

    let result = controller.upload(&path, &info).await;

    interrupt.abort();
    let _ = interrupt.await;
    drop(controller);
    let _ = printer.await;

    let data = result?;
    if !data.is_boolean() {
        println!("{}", serde_json::to_string_pretty(&data)?);
    }
    Ok(())
}

async fn run_operation(
    client: &PackageClient,
    kind: OperationKind,
    package_id: &str,
) -> anyhow::Result<()> {
    let on_progress = Arc::new(|event: &ProgressEvent| {
        println!(
            "{:5.1}%  {}",
            event.percent_or_zero(),
            event.message_or_empty()
        );
    });
    let pending = client.operations().start(kind, package_id, on_progress)?;

    let handle = pending.handle();
    let result = tokio::select! {
        result = pending.wait() => result,
        _ = tokio::signal::ctrl_c() => {
            handle.cancel();
            Err(pkgdeploy_progress::OperationError::Cancelled)
        }
    };

    let data = result?;
    println!("{} of {package_id} complete", kind.as_str());
    if !data.is_boolean() {
        println!("{}", serde_json::to_string_pretty(&data)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "starting pkgdeploy");

    let app = match AppConfig::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load config, using defaults");
            AppConfig::default()
        }
    };

    let tokens = Arc::new(token_manager(&cli, &app)?);
    let client = PackageClient::new(client_config(&cli, &app), tokens)?;

    let outcome = match cli.command {
        Command::Upload {
            ref path,
            ref category,
            ref pkg_version,
            ref name,
        } => {
            let info = PackageInfo {
                name: name.clone(),
                category: category.clone(),
                version: pkg_version.clone(),
            };
            run_upload(&client, path.clone(), info).await
        }
        Command::Install { ref package_id } => {
            run_operation(&client, OperationKind::Install, package_id).await
        }
        Command::Uninstall { ref package_id } => {
            run_operation(&client, OperationKind::Uninstall, package_id).await
        }
    };

    client.shutdown();
    outcome
}
