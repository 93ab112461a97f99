//! `FocusFlow` server: task sharing over HTTP with a websocket change feed.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:8787
//! cargo run --bin focusflow-server
//!
//! # Run on custom address with debug logs written to a file
//! cargo run --bin focusflow-server -- --bind 127.0.0.1:8080 \
//!     --log-level debug --log-file /tmp/focusflow.log
//!
//! # Or via environment variables
//! FOCUSFLOW_ADDR=127.0.0.1:8080 FOCUSFLOW_LOG=debug cargo run --bin focusflow-server
//! ```

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use focusflow::sharing::ActivityWarning;
use focusflow_server::api::{self, ServerState};
use focusflow_server::config::{ServerCliArgs, ServerConfig};
use tracing_appender::non_blocking::WorkerGuard;

#[tokio::main]
async fn main() {
    let cli = ServerCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match ServerConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let _log_guard = init_logging(&config.log_level, config.log_file.as_deref());

    tracing::info!(addr = %config.bind_addr, "starting focusflow server");

    let (state, mut warnings) = ServerState::new(config.core.clone());
    let state = Arc::new(state);

    let retry = state.app.spawn_activity_retry();
    tokio::spawn(async move {
        while let Some(ActivityWarning::WriteFailed {
            task_id,
            activity_type,
            reason,
        }) = warnings.recv().await
        {
            tracing::warn!(
                task_id = %task_id,
                activity_type = %activity_type,
                reason = %reason,
                "activity record queued for retry"
            );
        }
    });

    match api::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    }
    retry.abort();
}

/// Initialize logging to stderr, or to `file_path` when given.
///
/// `RUST_LOG` overrides `level`. File logging returns a [`WorkerGuard`]
/// that must be held until shutdown so buffered entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let Some((log_dir, file_name)) =
        file_path.and_then(|p| Some((p.parent()?, p.file_name()?.to_str()?)))
    else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
        return None;
    };

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}
