use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use creatorpay_core::{load_config, SourceKind};
use creatorpay_server::state::AppState;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod app;

use app::{build_manager, ensure_skeleton_config};

#[derive(Parser)]
#[command(name = "creatorpay", version, about = "creator post tracking and payouts")]
struct Cli {
    #[arg(
        long,
        default_value = "~/.creatorpay",
        help = "Config root directory (contains config/ and logs/)"
    )]
    config_root: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Start the viewer server and ingest tracked channels per session")]
    Start {
        #[arg(long, help = "HTTP server port, overrides server.port")]
        port: Option<u16>,
    },
    #[command(about = "Validate config files")]
    Validate,
}

fn expand_home(path: PathBuf) -> PathBuf {
    if !path.starts_with("~") {
        return path;
    }
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(path.strip_prefix("~").unwrap_or(&path)),
        None => path,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_root = expand_home(cli.config_root);

    let log_dir = config_root.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&log_dir, "creatorpay.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .init();

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    match command {
        Commands::Validate => {
            let config = load_config(&config_root.join("config"))?;
            let source = match config.source.kind {
                SourceKind::Http => "http",
                SourceKind::Static => "static",
            };
            println!(
                "Config valid. {} tracked identities, {} source, evaluator {:?}, decider {:?}.",
                config.tracked_identities.len(),
                source,
                config.evaluator.kind,
                config.decider
            );
        }
        Commands::Start { port } => {
            ensure_skeleton_config(&config_root, port.unwrap_or(3000))?;
            start(&config_root, port).await?;
        }
    }

    Ok(())
}

async fn start(root: &Path, port: Option<u16>) -> Result<()> {
    let config = load_config(&root.join("config"))?;
    let manager = Arc::new(build_manager(root, &config)?);
    let addr = format!(
        "{}:{}",
        config.server.host,
        port.unwrap_or(config.server.port)
    );
    tracing::info!(
        identities = config.tracked_identities.len(),
        policy = ?config.ingest_policy,
        "starting creatorpay"
    );
    creatorpay_server::serve(
        AppState::new(manager),
        &addr,
        creatorpay_server::shutdown_signal(),
    )
    .await
}
