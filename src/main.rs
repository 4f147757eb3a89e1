mod chat_log;
mod commands;
mod config;
mod dispatch;
mod http;
mod phone;
mod session;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use config::Config;
use dispatch::Dispatcher;
use session::{DriverFactory, SessionManager};

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "wagate.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let factory = Arc::new(DriverFactory::new(config.driver()));
    let (session, inbound) = SessionManager::new(config.session(), factory);

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("wagate.log"))
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to open log file in {}: {e}", log_dir.display());
            std::process::exit(1);
        }
    };
    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        );

    let log_chat = config
        .log_phone
        .as_deref()
        .map(|raw| phone::normalize(raw, &config.country_code).map(|p| phone::chat_id(&p)));
    match log_chat {
        Some(Ok(chat_id)) => {
            let chat_layer = chat_log::ChatLogLayer::new(session.clone(), chat_id);
            registry.with(chat_layer).init();
        }
        Some(Err(e)) => {
            registry.init();
            warn!("Log forwarding disabled, log_phone is unusable: {e}");
        }
        None => registry.init(),
    }

    info!("🚀 Starting wagate...");
    info!("Loaded config from {}", config.config_path.display());
    if config.api_key.is_none() {
        warn!("No API key configured, control API is open");
    }

    session.start().await;

    let dispatcher = Arc::new(Dispatcher::new(session.clone(), config.commands.clone()));
    tokio::spawn(dispatcher.run(inbound));

    let http_config = config.http();
    let router = http::build_router(session.clone(), &http_config);
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
        info!("Shutting down...");
    };

    let served = http::serve(router, &http_config, shutdown).await;
    session.shutdown().await;

    if let Err(e) = served {
        error!("❌ HTTP server failed: {e}");
        drop(guard);
        std::process::exit(1);
    }
}
