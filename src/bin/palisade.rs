use anyhow::Result;
use palisade::activity::EventCache;
use palisade::atproto::client::Client;
use palisade::config::Settings;
use palisade::embed::checker::EmbedChecker;
use palisade::matcher::{RuleMatcher, SubstringMatcher};
use palisade::metrics::create_metrics_publisher;
use palisade::moderation::ActionRouter;
use std::env;
use std::sync::Arc;
use tokio::signal;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing_subscriber::prelude::*;

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "palisade=info".into()),
    );

    // JSON output for collectors, pretty output for terminals
    let fmt_layer = if std::env::var("JSON_LOGS").is_ok() {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings_path = env::args().nth(1).unwrap_or_else(|| "palisade.yml".to_string());
    let settings = Settings::from_file(&settings_path)?;

    init_tracing();
    tracing::info!(settings = %settings_path, "starting palisade");

    let metrics = create_metrics_publisher(&settings.metrics)?;

    let client = Arc::new(Client::new(settings.client.clone(), metrics.clone()));
    client.connect().await?;
    tracing::info!(ready = client.is_ready(), dry_run = client.dry_run(), "client configured");

    let tracker = TaskTracker::new();
    let token = CancellationToken::new();

    let router = Arc::new(ActionRouter::new(
        settings.action_router.queue_limit,
        client.clone(),
        metrics.clone(),
    ));
    let router_handle = router.handle();
    {
        let router = router.clone();
        let token = token.clone();
        tracker.spawn(async move { router.run(token).await });
    }

    let matcher: Arc<dyn RuleMatcher> = Arc::new(SubstringMatcher::new(settings.rules.clone()));
    let checker = Arc::new(EmbedChecker::new(
        settings.embed_checker.clone(),
        matcher,
        router_handle,
        metrics.clone(),
    )?);
    checker.spawn_workers(&tracker, token.clone());

    let event_cache = Arc::new(EventCache::new(
        settings.account_cache.max_accounts,
        metrics.clone(),
    ));

    // The ingestion transport attaches here: embed-info lists go through
    // `checker.wait_enqueue`, account activity through `event_cache.record`.

    // Shutdown: close the tracker and cancel the workers on SIGINT/SIGTERM
    {
        let signal_tracker = tracker.clone();
        let signal_token = token.clone();
        tokio::spawn(async move {
            let ctrl_c = async {
                signal::ctrl_c()
                    .await
                    .expect("failed to install Ctrl+C handler");
            };

            #[cfg(unix)]
            let terminate = async {
                signal::unix::signal(signal::unix::SignalKind::terminate())
                    .expect("failed to install signal handler")
                    .recv()
                    .await;
            };

            #[cfg(not(unix))]
            let terminate = std::future::pending::<()>();

            tokio::select! {
                _ = ctrl_c => {
                    tracing::info!("received Ctrl+C, initiating shutdown");
                }
                _ = terminate => {
                    tracing::info!("received SIGTERM, initiating shutdown");
                }
            }

            signal_tracker.close();
            signal_token.cancel();
        });
    }

    tracker.wait().await;
    tracing::info!(
        cached_accounts = event_cache.len().await,
        evicted_accounts = event_cache.evicted_count(),
        "shutdown complete"
    );
    Ok(())
}
