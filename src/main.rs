use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;

use rir::{
    cli::Cli,
    config::RirConfig,
    core::{FileWatcher, PathMatcher},
    ActionRunner, BroadcastHub, EventDispatcher,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.setup_logging();

    let config = load_config(&cli)?;

    if cli.list {
        return print_screenshots(&config);
    }

    run(config).await
}

fn load_config(cli: &Cli) -> Result<RirConfig> {
    let mut config = RirConfig::load(&cli.config)?;
    config.apply_env();
    cli.apply_overrides(&mut config);
    config.validate()?;
    config.resolve_paths()?;
    Ok(config)
}

async fn run(config: RirConfig) -> Result<()> {
    let hub = Arc::new(BroadcastHub::new());
    let runner = ActionRunner::new(hub.clone(), config.dispatch.policy);
    let dispatcher = EventDispatcher::new(&config.dirs, Arc::new(runner))
        .context("failed to compile glob patterns")?
        .with_debounce(config.dispatch.debounce_window());

    let (watcher, streams) = FileWatcher::new(&config.dirs)?;

    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.try_send(());
    })?;

    let mut watch_task = tokio::spawn(dispatcher.run(streams.events, streams.errors));

    tracing::info!(
        dirs = config.dirs.len(),
        policy = ?config.dispatch.policy,
        debounce_ms = config.dispatch.debounce_ms,
        "running, Ctrl+c to exit"
    );

    tokio::select! {
        _ = shutdown_rx.recv() => {
            tracing::info!("shutting down");
            hub.close();
            drop(watcher);
            watch_task.abort();
            Ok(())
        }
        stopped = &mut watch_task => {
            drop(watcher);
            let reason = stopped.context("watch loop panicked")?;
            Err(anyhow::Error::new(reason).context("watching stopped"))
        }
    }
}

fn print_screenshots(config: &RirConfig) -> Result<()> {
    for (idx, dir) in config.dirs.iter().enumerate() {
        let matcher = PathMatcher::new(dir)?;
        let shots = matcher
            .screenshots()
            .with_context(|| format!("failed to glob screenshots in '{}'", dir.path.display()))?;

        println!("[{}] {}", idx, dir.path.display());
        if shots.is_empty() {
            println!("  (no screenshots)");
        }
        for shot in shots {
            println!("  {}", shot.name);
        }
    }
    Ok(())
}
