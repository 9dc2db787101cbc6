use anyhow::Context;
use ingestion::{EngineSettings, HttpPublisher, IngestionEngine, ItemHandler, RepositorySink};
use postwatch_core::{AppConfig, ErrorExt, Publisher};
use reddit_client::{ListingClient, ReqwestTransport};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "postwatch=info,reddit_client=info,ingestion=info,repository=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let config_path = AppConfig::resolve_path(std::env::args().nth(1));
    let config = AppConfig::from_file(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;

    tracing::info!(
        feeds = config.feeds.len(),
        backend = ?config.repository.backend,
        "Starting postwatch"
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received, stopping feed loops");
            }
            cancel.cancel();
        });
    }

    let repository = repository::open_repository(&config.repository)
        .await
        .context("opening repository")?;

    let client = ListingClient::from_config(&config.client).context("building listing client")?;

    let mut sink = RepositorySink::new(Arc::clone(&repository));
    if let Some(publisher_config) = config.publisher.as_ref().filter(|p| p.enabled) {
        let transport = ReqwestTransport::new(&config.client.user_agent, config.client.timeout())
            .context("building publisher transport")?;
        let publisher: Arc<dyn Publisher> = Arc::new(
            HttpPublisher::from_config(publisher_config, Arc::new(transport))
                .context("building publisher")?
                .with_cancellation(cancel.clone()),
        );
        tracing::info!(url = %publisher_config.url, topic = %publisher_config.topic, "Publishing enabled");
        sink = sink.with_publisher(publisher, publisher_config.topic.clone());
    }
    let handler: Arc<dyn ItemHandler> = Arc::new(sink);

    let engine = Arc::new(IngestionEngine::new(
        Arc::new(client),
        EngineSettings::from(&config.engine),
    ));
    let results = engine
        .run_all(config.feeds.clone(), handler, cancel.clone())
        .await;

    for (feed, result) in &results {
        match result {
            Ok(summary) => tracing::info!(
                feed = %feed,
                outcome = ?summary.outcome,
                pages = summary.pages,
                emitted = summary.emitted,
                "Feed finished"
            ),
            Err(e) => {
                e.log_error();
                tracing::warn!(feed = %feed, code = %e.error_code(), "Feed failed");
            }
        }
    }

    match repository.get_post_count(None).await {
        Ok(count) => tracing::info!(posts = count, "Shutting down"),
        Err(e) => {
            e.log_warn();
        }
    }
    repository.shutdown().await.context("shutting down repository")?;

    Ok(())
}
