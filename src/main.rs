use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rxsignals::{api, AnalyticsEngine, CachePolicy, Config};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

// CLI Arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Drug-safety analytics over openFDA and CMS Part D", long_about = None)]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API (default)
    Serve,
    /// Print the label word cloud
    WordCloud,
    /// Print interaction cluster counts
    Clusters,
    /// Print the adverse-event rate for one drug
    Signals {
        /// Drug name; the top drug by exposure when omitted
        #[arg(short, long)]
        drug: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rxsignals=info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();
    cli.config.validate()?;

    let source = Arc::new(cli.config.http_source()?);
    let engine = Arc::new(AnalyticsEngine::new(source, cli.config.settings()));

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&cli.config, engine).await,
        Command::WordCloud => print_json(&engine.word_cloud(CachePolicy::Bypass).await?),
        Command::Clusters => print_json(&engine.clusters(CachePolicy::Bypass).await?),
        Command::Signals { drug } => print_json(&engine.signals(drug.as_deref(), CachePolicy::Bypass).await?),
    }
}

async fn serve(config: &Config, engine: Arc<AnalyticsEngine>) -> Result<()> {
    let app = api::create_router(engine);
    let addr = config.bind_addr();

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("rxsignals {} listening on http://{}", rxsignals::VERSION, addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

fn print_json<T: Serialize>(report: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(err) => {
            tracing::warn!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await
        }
    }
}
