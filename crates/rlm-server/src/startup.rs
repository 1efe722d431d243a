//! Startup checks and process signals

use anyhow::{bail, Context, Result};
use orchestration::OllamaBackend;
use tracing::{info, warn};

/// Confirm every model in `names` is available on the backend.
///
/// Fails with the full list of missing models, or if the backend cannot be
/// reached at all.
pub async fn check_models(backend: &OllamaBackend, names: &[String]) -> Result<()> {
    let mut missing = Vec::new();
    for name in names {
        let present = backend.show_model(name).await.with_context(|| {
            format!(
                "Cannot reach Ollama at {} (is `ollama serve` running?)",
                backend.config().base_url
            )
        })?;
        if present {
            info!(model = %name, "startup.model_available");
        } else {
            warn!(model = %name, "startup.model_missing");
            missing.push(name.clone());
        }
    }

    if !missing.is_empty() {
        bail!(
            "Missing Ollama models: {}. Pull them with `ollama pull <model>`",
            missing.join(", ")
        );
    }
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
