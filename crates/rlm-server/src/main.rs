use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use orchestration::{OllamaBackend, RecursiveSession};
use rlm_server::api::{build_router, AppState};
use rlm_server::config::RuntimeConfig;
use rlm_server::startup::{check_models, shutdown_signal};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Recursive verification server: plan, answer, verify, escalate, revise
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Config file (defaults to ./rlm.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the OpenAI-compatible HTTP API
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        /// Start without confirming the models are pulled
        #[arg(long)]
        skip_model_check: bool,
    },
    /// Answer one prompt from the terminal
    Ask {
        prompt: String,
        /// Reference context chunk; repeatable
        #[arg(long = "context")]
        context: Vec<String>,
        /// Print the full session result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check that the backend is reachable and every configured model is available
    Check,
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let mut config = RuntimeConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Serve {
            host,
            port,
            skip_model_check,
        } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            serve(config, skip_model_check).await
        }
        Command::Ask {
            prompt,
            context,
            json,
        } => ask(config, &prompt, &context, json).await,
        Command::Check => {
            let backend = OllamaBackend::new(config.ollama_config())?;
            check_models(&backend, &config.required_models()).await?;
            info!(models = config.required_models().len(), "all models available");
            Ok(())
        }
    }
}

async fn serve(config: RuntimeConfig, skip_model_check: bool) -> Result<()> {
    if !skip_model_check {
        let backend = OllamaBackend::new(config.ollama_config())?;
        check_models(&backend, &config.required_models()).await?;
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!(
        addr = %addr,
        backend = %config.backend.base_url,
        ladder = ?config.models.ladder.iter().map(|m| m.name.as_str()).collect::<Vec<_>>(),
        grounding = config.orchestration.grounding,
        "rlm server starting"
    );

    let router = build_router(AppState::from_config(config)?);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("rlm server stopped");
    Ok(())
}

async fn ask(config: RuntimeConfig, prompt: &str, context: &[String], json: bool) -> Result<()> {
    let state = AppState::from_config(config)?;
    let policy = state.config.policy()?;
    let initial = policy.ladder()[0].clone();
    let options = state
        .config
        .session_options(initial, policy, state.grounding.clone());

    let session = RecursiveSession::new(Arc::clone(&state.backend), options);
    let result = session.run(prompt, context).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", result.content);
        info!(
            model = %result.model,
            attempts = result.attempts,
            confidence = result.confidence,
            revised = result.revised,
            "answer ready"
        );
    }
    Ok(())
}
