use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use pingwatch_service::config::{self, Config};
use pingwatch_service::database::{SubscriberRepository, initialize_database};
use pingwatch_service::dispatch::{Dispatcher, RecipientStore};
use pingwatch_service::monitoring::{IcmpChecker, ReportBuilder};
use pingwatch_service::pool;
use pingwatch_service::scheduler::Scheduler;
use pingwatch_service::tasks::ReportTask;
use pingwatch_service::telegram::{BotHandler, CommandRouter, TelegramClient};

/// Grace period for the bot handler after cancellation
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(version, about = "Periodic server reachability reports over Telegram")]
struct Cli {
    /// Config file (defaults to $XDG_CONFIG_HOME/pingwatch/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    config::init_logging(None);

    let mut config = Config::from_config(cli.config.as_ref())?;
    config.apply_env()?;

    if cli.print_config {
        print!("{}", config);
        return Ok(());
    }
    config.validate()?;

    let servers = Arc::new(config.servers.clone());

    let pool = pool::open_local(&config.storage.sqlite_path)
        .await
        .with_context(|| format!("failed to open SQLite database {}", config.storage.sqlite_path))?;
    {
        let conn = pool.get().await?;
        initialize_database(&conn).await?;
    }
    let store: Arc<dyn RecipientStore> = Arc::new(SubscriberRepository::new_from_pool(pool));

    let client = Arc::new(TelegramClient::new(&config.telegram.token)?);
    let me = client.get_me().await.context("failed to authorize with the Bot API")?;
    info!(
        id = me.id,
        "Authorized on account {}",
        me.username.as_deref().unwrap_or(me.first_name.as_str())
    );

    let builder = Arc::new(ReportBuilder::new(Arc::new(IcmpChecker::new(
        config.probe.count,
        config.probe.timeout_seconds,
    ))));
    let dispatcher = Arc::new(Dispatcher::new(store.clone(), client.clone(), config.dispatch()));

    let mut scheduler = Scheduler::new();
    ReportTask::new(builder.clone(), dispatcher, servers.clone())
        .register(&mut scheduler, config.report_interval())?;

    let shutdown = CancellationToken::new();

    let bot = BotHandler::new(
        client,
        CommandRouter::new(builder, store, servers),
        config.telegram.poll_timeout_seconds,
    );
    let bot_token = shutdown.clone();
    let mut bot_handle = tokio::spawn(async move {
        info!("Starting bot");
        bot.start(bot_token).await
    });

    scheduler.start(&shutdown)?;

    tokio::select! {
        signal = wait_for_signal() => {
            info!("Received {}. Shutting down...", signal);
            shutdown.cancel();
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut bot_handle).await {
                Ok(_) => info!("Bot stopped gracefully"),
                Err(_) => {
                    warn!("Shutdown timeout exceeded, aborting bot handler");
                    bot_handle.abort();
                }
            }
        }
        outcome = &mut bot_handle => {
            match outcome {
                Ok(Ok(())) => info!("Bot stopped"),
                Ok(Err(e)) => error!("Bot stopped with error: {:#}", e),
                Err(e) => error!("Bot task failed: {}", e),
            }
            shutdown.cancel();
        }
    }

    scheduler.stop().await;

    info!("Application shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            return ctrl_c().await;
        }
    };

    tokio::select! {
        name = ctrl_c() => name,
        _ = terminate.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    "SIGINT"
}
