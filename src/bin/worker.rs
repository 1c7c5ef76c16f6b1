use job_link_pipeline::{
    app_state::AppState,
    config::AppConfig,
    models::link::{LinkRetryStatus, ProcessedLink, SubmittedLink},
    services::queue,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL_MS: u64 = 1000; // 1 second

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting job link worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    if let Some(addr) = &config.metrics_addr {
        let addr: SocketAddr = addr.parse().expect("METRICS_ADDR must be host:port");
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .expect("Failed to install Prometheus exporter");
        describe_metrics();
        tracing::info!(%addr, "Serving Prometheus metrics");
    }

    let state = AppState::from_config(&config).expect("Failed to initialize services");

    if let Err(e) = state.queue.health_check().await {
        tracing::warn!(error = %e, "Redis not reachable yet, will keep polling");
    }

    tracing::info!(
        link_max_attempts = state.link_max_attempts,
        "Worker ready, starting link processing loop"
    );

    loop {
        match process_next_link(&state).await {
            Ok(true) => {
                tracing::debug!("Link processed, checking for next link");
            }
            Ok(false) => {
                tracing::trace!("No links queued, sleeping");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Error processing link, will retry");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
        }
    }
}

fn describe_metrics() {
    metrics::describe_counter!("link_pipeline_runs_total", "Pipeline runs by outcome");
    metrics::describe_counter!("link_pipeline_failures_total", "Failed runs by stage");
    metrics::describe_histogram!(
        "link_stage_duration_seconds",
        "Time spent in each pipeline stage"
    );
    metrics::describe_counter!("retry_attempts_total", "Retry engine decisions by outcome");
    metrics::describe_counter!("link_submissions_total", "Deposit calls by outcome");
    metrics::describe_gauge!("link_queue_depth", "Links waiting in the queue");
}

/// Process the next link from the queue.
/// Returns Ok(true) if a link was processed, Ok(false) if none was queued.
async fn process_next_link(state: &AppState) -> Result<bool, Box<dyn std::error::Error>> {
    let (link, payload) = match state.queue.dequeue().await? {
        Some(entry) => entry,
        None => return Ok(false),
    };

    if let Ok(depth) = state.queue.queue_depth().await {
        metrics::gauge!("link_queue_depth").set(depth as f64);
    }

    tracing::info!(
        link_id = %link.id,
        url = %link.original_url,
        attempts_count = link.attempts_count,
        "Processing submitted link"
    );

    let processed = state.pipeline.process(link.clone()).await;

    if let ProcessedLink::Failed(failed) = &processed {
        let status = queue::retry_status(link.attempts_count, state.link_max_attempts, &failed.error);
        if status == LinkRetryStatus::PendingRetry {
            state.queue.requeue(&link, &payload).await?;
            tracing::info!(
                link_id = %link.id,
                attempts_count = link.attempts_count + 1,
                stage = %failed.failure_stage,
                "Link re-queued for another run"
            );
            return Ok(true);
        }
    }

    deposit(state, &link, &payload, &processed).await?;
    Ok(true)
}

/// Deposit a final outcome. Deposit failures send the link around again
/// until its run budget is spent.
async fn deposit(
    state: &AppState,
    link: &SubmittedLink,
    payload: &str,
    processed: &ProcessedLink,
) -> Result<(), Box<dyn std::error::Error>> {
    let result = processed.to_result();
    match state.deposit.submit(&result).await {
        Ok(()) => {
            state.queue.complete(payload).await?;
            tracing::info!(
                link_id = %link.id,
                status = %result.link_processing_status(),
                "Link finished"
            );
        }
        Err(e) if queue::has_runs_left(link.attempts_count, state.link_max_attempts) => {
            tracing::warn!(link_id = %link.id, error = %e, "Deposit failed, re-queueing link");
            state.queue.requeue(link, payload).await?;
        }
        Err(e) => {
            tracing::error!(
                link_id = %link.id,
                error = %e,
                "Deposit failed after max attempts, dropping link"
            );
            state.queue.complete(payload).await?;
        }
    }
    Ok(())
}
