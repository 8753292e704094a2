//! Main Entrypoint for the Lectern tutoring agent
//!
//! `lectern serve` (the default) runs the WebSocket agent:
//! 1. Loading configuration from the environment.
//! 2. Opening the content store.
//! 3. Constructing the Axum router and applying middleware.
//! 4. Starting the web server and handling graceful shutdown.
//!
//! `lectern preview` prints the lesson plan, instructions and welcome a
//! learner would get, without contacting any model.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use lectern_agent::{config::Config, router::create_router, state::AppState};
use lectern_core::{FsContentStore, PromptComposer, SessionMode, build_plan, room::Participant};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{Level, info};

#[derive(Parser, Debug)]
#[command(name = "lectern", version, about = "Voice tutoring agent")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve tutoring rooms over WebSocket (default).
    Serve,
    /// Print the plan and instructions for a learner without starting a session.
    Preview(PreviewArgs),
}

#[derive(Args, Debug)]
struct PreviewArgs {
    /// Directory holding `section<N>` files.
    #[arg(long, default_value = "./content")]
    content_dir: PathBuf,

    /// Learner identity; its prefix selects the session mode.
    #[arg(long, default_value = "SQUARE")]
    identity: String,

    /// Subject named in the instructions.
    #[arg(long, default_value = "philosophy")]
    subject: String,
}

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

fn init_tracing(level: Level) {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
}

async fn serve() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    init_tracing(config.log_level);
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Open the content store ---
    if !config.content_dir.is_dir() {
        tracing::warn!(
            content_dir = %config.content_dir.display(),
            "Content directory does not exist; sessions will start with an empty plan"
        );
    }
    let app_state = Arc::new(AppState {
        content: Arc::new(FsContentStore::new(config.content_dir.clone())),
        config: Arc::new(config.clone()),
    });

    // --- 4. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 5. Start Server ---
    info!(
        model = %config.realtime_model,
        subject = %config.subject,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}

async fn preview(args: PreviewArgs) -> anyhow::Result<()> {
    init_tracing(Level::WARN);

    let store = FsContentStore::new(args.content_dir);
    let plan = build_plan(&store).await;
    let participant = Participant::new(args.identity);
    let mode = SessionMode::from_key(participant.mode_key());
    let composer = PromptComposer::new(args.subject);

    println!("Mode: {mode}");
    println!(
        "Plan: {} section(s), {} paragraph(s)",
        plan.section_count(),
        plan.paragraph_count()
    );
    for section in plan.sections() {
        println!("  section{}: {} paragraph(s)", section.id, section.paragraphs.len());
    }
    println!("\n--- Welcome ---\n{}", composer.welcome_message(&plan, mode));
    println!("\n--- Instructions ---\n{}", composer.compose(&plan, mode));
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve().await,
        Command::Preview(args) => preview(args).await,
    }
}
