// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of FluxION.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use autoupdate_server::asset_cache::{AssetCache, AssetStore};
use autoupdate_server::catalog::{CatalogSource, ReleaseCatalog};
use autoupdate_server::config::ServerConfig;
use autoupdate_server::decision::{DecisionEngine, UpdatePolicy};
use autoupdate_server::gate::RequestGate;
use autoupdate_server::http::{self, AppEntry, AppState};
use autoupdate_server::patch::{BsdiffCommand, PatchGenerator};
use autoupdate_server::release_source::{GithubReleaseSource, ReleaseSource};
use autoupdate_server::scheduler::{shutdown_channel, spawn_catalog_refresh};
use autoupdate_server::signing::Signer;

#[derive(Debug, Parser)]
#[command(name = "autoupdate-server")]
#[command(author, version, about = "Signed self-update server backed by GitHub releases")]
struct Cli {
    /// Path to the TOML configuration
    #[arg(short, long, default_value = "autoupdate.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Generate a new Ed25519 signing key and print its public half
    Keygen {
        /// Where to write the PKCS#8 PEM private key
        #[arg(long)]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("autoupdate_server=info")),
        )
        .init();

    let cli = Cli::parse();
    if let Some(Commands::Keygen { out }) = cli.command {
        return keygen(&out);
    }

    info!(path = %cli.config.display(), "Loading configuration");
    let config = ServerConfig::from_file(&cli.config)?;
    run(config).await
}

fn keygen(out: &Path) -> anyhow::Result<()> {
    if out.exists() {
        bail!("Refusing to overwrite existing key {}", out.display());
    }

    let signer = Signer::generate();
    std::fs::write(out, signer.to_pem()?)
        .with_context(|| format!("Failed to write key to {}", out.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(out, std::fs::Permissions::from_mode(0o600))?;
    }

    info!(path = %out.display(), "Generated signing key");
    println!("{}", signer.public_key_hex());
    Ok(())
}

async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let signer = Arc::new(
        Signer::from_key_file(&config.signing.private_key_path)
            .context("Could not load the signing key")?,
    );
    info!(public_key = %signer.public_key_hex(), "Signing key loaded");

    let source: Arc<dyn ReleaseSource> = Arc::new(GithubReleaseSource::new(
        &config.github.api_base_url,
        config.github.token.clone(),
        config.github.per_page,
    )?);
    let store: Arc<dyn AssetStore> = Arc::new(AssetCache::new(
        &config.assets.cache_dir,
        Duration::from_secs(config.assets.download_timeout_secs),
    )?);
    tokio::fs::create_dir_all(&config.server.patches_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.server.patches_dir.display()))?;
    let patches: Arc<dyn PatchGenerator> = Arc::new(BsdiffCommand::new(
        &config.patches.program,
        &config.server.patches_dir,
        Arc::clone(&store),
    ));

    let mut apps = HashMap::new();
    for app in &config.apps {
        let catalog = Arc::new(ReleaseCatalog::new(
            CatalogSource {
                owner: app.owner.clone(),
                repo: app.repo.clone(),
                min_major_version: config.github.min_major_version,
            },
            Arc::clone(&source),
            Arc::clone(&store),
            Arc::clone(&signer),
        ));

        // Without a first catalog there is nothing to answer with
        let summary = catalog
            .refresh()
            .await
            .with_context(|| format!("Initial release refresh for {} failed", app.name))?;
        info!(
            app = %app.name,
            owner = %app.owner,
            repo = %app.repo,
            assets = summary.assets,
            "Catalog ready"
        );

        let policy = UpdatePolicy::from_settings(app)
            .with_context(|| format!("Invalid update policy for {}", app.name))?;
        let engine = DecisionEngine::new(policy, Arc::clone(&patches));
        apps.insert(app.name.clone(), AppEntry { catalog, engine });
    }

    if config.app(&config.default_app).is_none() {
        warn!(default_app = %config.default_app, "Default app is not configured, /update will answer 404");
    }

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let period = Duration::from_secs(config.github.refresh_interval_secs);
    let refreshers: Vec<_> = apps
        .values()
        .map(|entry| spawn_catalog_refresh(Arc::clone(&entry.catalog), period, shutdown_rx.clone()))
        .collect();

    let state = AppState::new(
        apps,
        config.default_app.clone(),
        config.server.public_address.clone(),
        signer,
        RequestGate::from_settings(&config.gate),
    );
    let app = http::router(state, &config.server.patches_dir);

    let addr = format!("{}:{}", config.server.bind_address, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Autoupdate server listening on {addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, stopping refresh tasks");
    if shutdown_tx.send(true).is_err() {
        warn!("No refresh task was listening for shutdown");
    }
    for handle in refreshers {
        if let Err(e) = handle.await {
            warn!(error = %e, "Refresh task ended abnormally");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Ctrl-C received"),
        () = terminate => info!("SIGTERM received"),
    }
}
