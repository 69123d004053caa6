//! Atelier engine entry point.
//!
//! `serve` fronts one session over stdio: client control messages arrive
//! as JSON lines on stdin, engine events leave as JSON lines on stdout,
//! logs go to stderr.

use anyhow::Context;
use atelier::bootstrap::preflight_required;
use atelier::{
    build_bus, init_tracing, ClientMessage, ModelSet, SessionController, WorkspaceRegistry,
};
use atelier_core::{event_stream, EngineConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "atelier")]
#[command(about = "Supervisor-routed multi-agent coding engine", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Path to the engine configuration (TOML). Defaults are used when
    /// omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve one session over stdio (JSON lines in, events out).
    Serve,

    /// Load and validate the configuration, then print a summary.
    Check,

    /// Show version information.
    Version,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("atelier {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Check => {
            let config = load_config(cli.config.as_ref())?;
            println!(
                "configuration ok: recursion_limit={}, {} tool server(s), checkpointing {}",
                config.recursion_limit,
                config.tool_servers.len(),
                if config.checkpoint.enabled { "on" } else { "off" }
            );
            for server in &config.tool_servers {
                println!("  tool server `{}`: {}", server.name, server.command);
            }
            Ok(())
        }
        Commands::Serve => {
            init_tracing();
            let config = Arc::new(load_config(cli.config.as_ref())?);
            serve(config).await
        }
    }
}

async fn serve(config: Arc<EngineConfig>) -> anyhow::Result<()> {
    let models = Arc::new(ModelSet::from_config(&config)?);
    let (sink, subscriber) = event_stream(
        uuid::Uuid::new_v4().to_string(),
        config.event_buffer_capacity,
    );
    let bus = build_bus(&config, sink.clone());
    preflight_required(&config, &bus).await?;
    let controller = SessionController::new(
        Arc::clone(&config),
        models,
        Arc::clone(&bus),
        WorkspaceRegistry::new(),
        sink,
    );

    // Events out: one JSON object per line on stdout.
    let writer = tokio::spawn(async move {
        while let Some(envelope) = subscriber.recv().await {
            match serde_json::to_string(&envelope) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, "event serialization failed"),
            }
        }
    });

    info!(session_id = %controller.session_id(), "serving on stdio");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                break;
            }
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let message: ClientMessage = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "unparseable client message");
                continue;
            }
        };

        match message {
            ClientMessage::Init { workspace_path } => {
                if let Err(e) = controller.handle_init(&workspace_path) {
                    warn!(error = %e, "init rejected");
                }
            }
            ClientMessage::Query { text } => {
                // Run in the background so cancel and approval messages
                // stay responsive.
                let runner = controller.clone();
                tokio::spawn(async move {
                    match runner.run_query(&text).await {
                        Ok(outcome) => {
                            info!(status = ?outcome.status, "query finished")
                        }
                        Err(e) => warn!(error = %e, "query rejected"),
                    }
                });
            }
            ClientMessage::Cancel {} => controller.cancel(),
            ClientMessage::ApprovalResponse {
                correlation_id,
                decision,
                feedback,
            } => controller.handle_approval(&correlation_id, decision, feedback),
        }
    }

    controller.close();
    bus.shutdown().await;
    writer.await.ok();
    Ok(())
}
