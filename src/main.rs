use std::sync::Arc;

use tracing::info;

use roomturn::config::{ServiceConfig, Settings};
use roomturn::effects::{self, EffectDispatcher};
use roomturn::engine::Engine;
use roomturn::ports::{InMemoryGuestDirectory, LogNotifier, NoopStock};
use roomturn::sweep;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let cfg = ServiceConfig::from_env();
    roomturn::observability::init(cfg.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&cfg.data_dir)?;
    let wal_path = cfg.data_dir.join("roomturn.wal");

    let engine = Arc::new(Engine::new(
        wal_path.clone(),
        Settings::default(),
        Arc::new(InMemoryGuestDirectory::new()),
    )?);

    if let Some(path) = &cfg.settings_file {
        let settings = Settings::load(path)?;
        if settings != engine.settings().await {
            engine.update_settings(settings).await?;
            info!("settings loaded from {}", path.display());
        }
    }

    info!("roomturn running");
    info!("  wal: {}", wal_path.display());
    info!("  sweep every {:?}", cfg.sweep_interval);
    info!("  effect timeout {:?}", cfg.effect_timeout);
    info!(
        "  metrics: {}",
        cfg.metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let dispatcher = Arc::new(EffectDispatcher::new(
        Arc::new(LogNotifier),
        Arc::new(NoopStock),
        cfg.effect_timeout,
    ));
    let (effects_tx, effects_rx) = tokio::sync::mpsc::channel(256);
    let dispatch = tokio::spawn(effects::run_dispatcher(dispatcher, effects_rx));

    let sweeper = tokio::spawn(sweep::run_sweep(engine.clone(), cfg.sweep_interval, effects_tx));
    let compactor = tokio::spawn(sweep::run_compactor(engine.clone(), cfg.compact_threshold));

    // Graceful shutdown on SIGTERM/ctrl-c
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }

    info!("shutdown signal received");
    sweeper.abort();
    compactor.abort();
    // The sweep owned the only sender; the dispatcher drains what is queued and exits.
    let _ = sweeper.await;
    let _ = dispatch.await;
    if let Err(e) = engine.compact_wal().await {
        tracing::warn!("final compaction failed: {e}");
    }
    info!("roomturn stopped");
    Ok(())
}
