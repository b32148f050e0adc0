use std::sync::Arc;

use clap::Parser;
use paydesk_core::PaydeskConfig;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use paydesk_server::store::PgStore;
use paydesk_server::subsystems::notify::TelegramNotifier;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "paydesk.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience — production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Init logging
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    // Load config
    let config = match PaydeskConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Connect to DB
    let pool = match paydesk_core::db::create_pool(&config.database).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    if args.health {
        match paydesk_core::db::health_check(&pool).await {
            Ok(v) => println!("✅ PostgreSQL connected: {}", v),
            Err(e) => {
                println!("❌ PostgreSQL connection failed: {}", e);
                std::process::exit(1);
            }
        }

        println!("✅ Paydesk DB health check passed");
        return Ok(());
    }

    let mut store = PgStore::new(pool);
    store.init_schema().await?;

    if config.notify.enabled {
        match TelegramNotifier::new(config.notify.clone()) {
            Ok(notifier) => {
                store = store.with_notifier(Arc::new(notifier));
            }
            Err(e) => {
                tracing::warn!("Telegram notifications disabled: {}", e);
            }
        }
    }

    // Shutdown fan-out
    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    paydesk_server::http::start_http_server(store, config, tx.subscribe()).await?;

    Ok(())
}
