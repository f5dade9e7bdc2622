use anyhow::Context;
use shelfwatch::{Config, Engine, Transport};
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

/// Seconds between summary lines in the log
const SUMMARY_INTERVAL_SECS: u64 = 30;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    shelfwatch::init()?;

    info!("Shelfwatch v{} starting", shelfwatch::VERSION);

    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("loading configuration from {}", path))?,
        None => {
            info!("No configuration file given, using defaults");
            Config::default()
        }
    };
    info!(
        "Monitoring {} shelves, tick {}ms, port {}",
        config.shelves.count, config.engine.tick_ms, config.serial.port
    );

    let mut engine = Engine::new(config.clone(), link(&config)).context("creating engine")?;
    let handle = engine.handle();

    // Periodic summary for headless runs
    let reporter = handle.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(SUMMARY_INTERVAL_SECS));
        interval.tick().await;
        loop {
            interval.tick().await;
            let snapshot = reporter.snapshot();
            info!(
                "{} | avg {} | hottest {} | {} alarm(s), {} unacknowledged",
                snapshot.mode,
                format_temp(snapshot.kpis.average_temperature),
                format_temp(snapshot.kpis.hottest_temperature),
                snapshot.kpis.active_alarms,
                snapshot.kpis.unacknowledged_alarms
            );
        }
    });

    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let run = engine.run();
    tokio::pin!(run);

    // Let the engine finish its current tick and close the link.
    let result = tokio::select! {
        _ = &mut ctrl_c => {
            info!("Received shutdown signal");
            handle.stop();
            run.as_mut().await
        }
        res = run.as_mut() => res,
    };
    if let Err(e) = result {
        error!("Engine error: {}", e);
        std::process::exit(1);
    }

    info!("Engine stopped normally");

    let stats = handle.stats();
    info!(
        "Final stats: {} ticks, {} errors, {} messages applied, uptime: {}s",
        stats.tick_count, stats.error_count, stats.reconcile.applied, stats.uptime_secs
    );

    Ok(())
}

#[cfg(feature = "serial")]
fn link(config: &Config) -> Box<dyn Transport> {
    Box::new(shelfwatch::SerialLink::new(config.serial.clone()))
}

#[cfg(not(feature = "serial"))]
fn link(_config: &Config) -> Box<dyn Transport> {
    Box::new(shelfwatch::MemoryLink::offline(
        "built without the `serial` feature",
    ))
}

fn format_temp(value: Option<f64>) -> String {
    value
        .map(|t| format!("{:.1}°C", t))
        .unwrap_or_else(|| "--".to_string())
}
