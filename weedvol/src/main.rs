use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use libengine::{DockerEngine, Engine};
use tokio::signal;
use tracing::{error, info};

use weedvol::config::{Args, RegistryKind, load_xline_config};
use weedvol::registry::Registry;
use weedvol::registry::local::LocalRegistry;
use weedvol::registry::xline::XlineRegistry;
use weedvol::{Controller, HelperSettings, MountOrchestrator, PluginDir, logging, server};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    logging::init(args.debug);

    let engine: Arc<dyn Engine> = Arc::new(
        DockerEngine::from_host(args.docker_socket.as_deref())
            .context("Invalid docker endpoint")?,
    );
    let registry = open_registry(&args).await?;

    let plugin_dir = match &args.plugin_dir {
        Some(dir) => PluginDir::known(dir),
        None => PluginDir::resolve(engine.as_ref(), &args.helper_image, &args.plugins_root).await,
    };
    info!(plugin_dir = %plugin_dir, "plugin directory");

    let helper = HelperSettings {
        image: args.helper_image.clone(),
        filer: args.filer.clone(),
        network: args.helper_network.clone(),
        unmount_timeout: args.unmount_timeout(),
        ..Default::default()
    };
    let orchestrator = MountOrchestrator::new(engine, helper, plugin_dir, args.volume_root.clone());
    let controller = Arc::new(Controller::new(
        registry,
        orchestrator,
        args.volume_root.clone(),
    ));

    controller
        .reconcile()
        .await
        .context("Failed to reconcile volume state")?;

    server::serve(&args.socket, controller, shutdown_signal())
        .await
        .with_context(|| format!("Failed to serve on {}", args.socket.display()))?;
    info!("stopped");
    Ok(())
}

async fn open_registry(args: &Args) -> Result<Arc<dyn Registry>> {
    match args.registry {
        RegistryKind::Local => {
            let path = args.state_path();
            let registry = LocalRegistry::open(&path)
                .await
                .with_context(|| format!("Failed to load state from {}", path.display()))?;
            Ok(Arc::new(registry))
        }
        RegistryKind::Xline => {
            let cfg_path = args
                .xline_config
                .as_deref()
                .context("--xline-config is required with --registry xline")?;
            let cfg = load_xline_config(cfg_path)?;
            let registry = XlineRegistry::connect(&cfg)
                .await
                .context("Failed to connect to xline")?;
            Ok(Arc::new(registry))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutting down");
}
