//! CLI entry point for the session scratch daemon (scratchd).

use std::process::ExitCode;

use anyhow::Context;
use session_scratch::cli::Cli;
use session_scratch::config::{load_config, load_default_config, ScratchConfig};
use session_scratch::manager::ScratchManager;
use session_scratch::sandbox::SessionId;
use session_scratch::utils::init_debug_logging;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();

    // Initialize logging
    init_debug_logging(cli.debug);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load(&cli)?;
    let manager = ScratchManager::new(config).context("Failed to initialize scratch root")?;

    if let Some(ref raw) = cli.purge {
        let session = SessionId::parse(raw).context("Invalid session id")?;
        let erased = manager.purge_now(&session);
        println!("Purged {} file(s) for session {}", erased, session.tag());
        return Ok(());
    }

    // Nothing from a previous process lifetime may survive.
    manager.run_startup_sweep();

    if cli.once {
        let purged = manager.sweep_orphans();
        tracing::debug!(purged, "Single sweep finished");
        return Ok(());
    }

    let interval = cli
        .get_interval()
        .unwrap_or_else(|| manager.config().sweep_interval());
    let sweep = manager.register_background_sweep(interval);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    tracing::info!("Shutting down");
    sweep.shutdown().await;
    Ok(())
}

fn load(cli: &Cli) -> anyhow::Result<ScratchConfig> {
    let mut config = match cli.get_settings_path() {
        Some(path) if path.exists() => load_config(&path)
            .with_context(|| format!("Error loading config from {}", path.display()))?,
        _ => load_default_config().context("Error loading default config")?,
    };

    if let Some(ref root) = cli.root {
        config.scratch_root = Some(root.clone());
    }
    config.validate().context("Invalid configuration")?;

    Ok(config)
}
