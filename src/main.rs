use std::sync::Arc;

use color_eyre::Section;
use color_eyre::eyre::{Result, WrapErr};
use signalbot::config::Config;
use signalbot::logging::init_tracing;
use signalbot::market::build_source;
use signalbot::notify::build_notifier;
use signalbot::scanner::Scanner;
use signalbot::web_server;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let dotenv_result = dotenv::dotenv();
    let config = Config::load();
    let _guard = init_tracing(&config.log_dir, "signalbot")?;
    if let Err(e) = dotenv_result {
        warn!("No .env file loaded ({}), using environment only", e);
    }

    info!("🚀 signalbot - market signal scanner");
    info!("📊 Config loaded:");
    info!("  - Symbols: {:?}", config.symbols());
    info!("  - Timeframes: {:?}", config.timeframes());
    info!("  - Data source: {}", config.data_source);
    info!("  - Scan interval: {}s", config.scan_interval_secs);
    info!("  - Signal-only mode: {}", config.signal_only_mode);
    info!("  - Telegram: {}", if config.telegram_enabled() { "enabled" } else { "disabled (log only)" });
    info!("  - Web UI Port: {}", config.web_ui_port);

    let source = build_source(&config).wrap_err("Failed to set up market data source")?;
    let notifier = build_notifier(&config)
        .wrap_err("Failed to set up notifier")
        .with_suggestion(|| "Check TELEGRAM_BOT_TOKEN and TELEGRAM_CHAT_IDS")?;
    let web_port = config.web_ui_port;
    let scanner = Arc::new(Scanner::new(config, source, notifier));

    let api = scanner.clone();
    tokio::spawn(async move {
        if let Err(e) = web_server::start_web_server(web_port, api).await {
            error!("❌ Web server error: {:?}", e);
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("🛑 Shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    scanner.run(shutdown_rx).await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!("Cannot listen for SIGTERM ({}), waiting for ctrl-c only", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
