use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use scout::api::{AppState, create_router};
use scout::collaborators::ProgressSink;
use scout::data_models::ProgressEvent;
use scout::error::SinkClosed;
use scout::gemini::GeminiClient;
use scout::notion::NotionClient;
use scout::{AppConfig, Collaborators, Orchestrator};

#[derive(Parser)]
#[command(name = "scout", about = "Answer questions from a Notion workspace")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP server.
    Serve,
    /// Answer a single question and print the result.
    Ask {
        #[arg(required = true)]
        query: Vec<String>,
    },
}

struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn deliver(&self, event: &ProgressEvent) -> Result<(), SinkClosed> {
        eprintln!(
            "[{}/{}] {:>3}% {}",
            event.step, event.total_steps, event.percentage, event.message
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env().context("failed to load configuration")?;

    let notion = Arc::new(NotionClient::new(
        &config.notion_api_key,
        &config.notion_version,
    ));
    let gemini = Arc::new(GeminiClient::new(
        &config.google_api_key,
        &config.gemini_model,
    ));
    let collaborators = Collaborators::new(notion, gemini);

    match cli.command {
        Command::Serve => serve(collaborators, &config).await,
        Command::Ask { query } => {
            let orchestrator = Orchestrator::new(collaborators, &config.search)?;
            ask(orchestrator, &query.join(" ")).await
        }
    }
}

async fn serve(collaborators: Collaborators, config: &AppConfig) -> anyhow::Result<()> {
    let app = create_router(AppState::new(collaborators, &config.search)?);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}

async fn ask(orchestrator: Orchestrator, query: &str) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let result = orchestrator
        .run(query, Some(&StderrProgress), &cancel)
        .await?;
    println!("{}", result.response);
    tracing::info!(
        keywords = ?result.metadata.keywords,
        found = result.metadata.total_pages_found,
        selected = result.metadata.selected_pages,
        elapsed_ms = result.metadata.processing_time_ms,
        "query answered"
    );
    Ok(())
}
