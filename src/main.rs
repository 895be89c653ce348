use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use agent_dispatch::app::build_processor;
use agent_dispatch::config::{PipelineConfig, ServerConfig};
use agent_dispatch::gateway::{WebhookState, webhook_routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let server = ServerConfig::from_env()?;
    let _log_guard = init_tracing(server.log_dir.as_deref());
    let pipeline = PipelineConfig::from_env()?;

    eprintln!("📨 Agent Dispatch v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {} @ {}", server.llm.model, server.llm.base_url);
    eprintln!("   Gateway: {}", server.gateway_base_url);
    eprintln!("   Webhook: http://0.0.0.0:{}/webhook/{{instance_id}}", server.port);
    eprintln!(
        "   Policy: auto_assign={} rule_fallback={} dispatch>{}",
        pipeline.auto_assignment_enabled, pipeline.rule_fallback_enabled, pipeline.dispatch_threshold
    );

    let processor = Arc::new(
        build_processor(&server, &pipeline)
            .await
            .context("building pipeline")?,
    );

    // ── HTTP ─────────────────────────────────────────────────────────────
    let app = webhook_routes(WebhookState { processor });
    let listener = TcpListener::bind(("0.0.0.0", server.port))
        .await
        .with_context(|| format!("binding port {}", server.port))?;
    tracing::info!(port = server.port, "Webhook server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    Ok(())
}

/// Stderr logging, plus a daily rolling file when `log_dir` is set.
///
/// The returned guard flushes the file writer on drop.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    match log_dir {
        Some(dir) => {
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "agent-dispatch.log"));
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}
