mod api;
mod artwork;
mod cli;
mod commands;
mod core;
mod download_manager;
mod filter_cache;
mod http;
mod mpv;
mod reachability;
mod store;
mod viewmodel;

use anyhow::Context;
use archive_proto::config::Config;
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::cli::{Cli, Commands};
use crate::core::BroadcastMessage;

/// Forwards WARN and ERROR events to the broadcast channel while serving.
struct BroadcastLayer {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        // No receivers is fine
        let _ = self.sender.send(BroadcastMessage::Log(message));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

fn init_logging(broadcast: Option<broadcast::Sender<BroadcastMessage>>) -> anyhow::Result<()> {
    let data_dir = archive_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("arcplay.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("cannot open log file {:?}", log_path))?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(broadcast.map(|sender| BroadcastLayer { sender }))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,arcplay=debug,hyper=warn,hyper_util=warn,reqwest=warn")
            }),
        )
        .init();

    info!("Log file: {:?}", log_path);
    Ok(())
}

async fn run(cli: Cli, broadcast_tx: broadcast::Sender<BroadcastMessage>) -> anyhow::Result<()> {
    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let store = match store::Store::open(&config.paths.database) {
        Ok(store) => store.into_shared(),
        Err(e) => {
            error!("Cannot open library {:?}: {}", config.paths.database, e);
            eprintln!("fatal: cannot open library {:?}: {}", config.paths.database, e);
            std::process::exit(2);
        }
    };

    let app = commands::App::new(config, store)?;
    app.run(cli.command, broadcast_tx).await
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(100);
    let forward = matches!(cli.command, Commands::Serve).then(|| broadcast_tx.clone());
    if let Err(e) = init_logging(forward) {
        eprintln!("warning: logging disabled: {:#}", e);
    }

    if let Err(e) = run(cli, broadcast_tx).await {
        error!("{:#}", e);
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
