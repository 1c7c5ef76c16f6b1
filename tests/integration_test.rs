use job_link_pipeline::{
    config::AppConfig,
    models::link::SubmittedLink,
    services::{
        ai::OpenAiClient,
        browser::ChromiumLauncher,
        extraction::{AiExtractor, MetadataExtractor},
        queue::JobQueue,
        scraper::{BrowserScraper, PageScraper},
    },
};
use std::sync::Arc;
use std::time::Duration;

/// Integration test: Redis queue round trip
///
/// Requires a running Redis instance configured via REDIS_URL.
#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_queue_round_trip() {
    let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
    let queue = JobQueue::new(&redis_url).expect("Failed to initialize queue");
    queue.health_check().await.expect("Redis not reachable");

    let link = SubmittedLink::new("https://jobs.example.com/integration");
    queue.enqueue(&link).await.expect("Failed to enqueue");

    // Other tests may share the queue; drain until our link shows up.
    let mut found = None;
    while let Some((dequeued, payload)) = queue.dequeue().await.expect("Failed to dequeue") {
        if dequeued.id == link.id {
            found = Some((dequeued, payload));
            break;
        }
        queue.complete(&payload).await.expect("Failed to complete");
    }
    let (dequeued, payload) = found.expect("Enqueued link not found");
    assert_eq!(dequeued, link);

    queue.requeue(&dequeued, &payload).await.expect("Failed to requeue");
    let (retried, payload) = queue
        .dequeue()
        .await
        .expect("Failed to dequeue")
        .expect("Requeued link missing");
    assert_eq!(retried.id, link.id);
    assert_eq!(retried.attempts_count, 1);
    queue.complete(&payload).await.expect("Failed to complete");
}

/// Integration test: headless Chromium scrape of a public page
///
/// Requires Chrome or Chromium on PATH (or CHROME_EXECUTABLE) and network access.
#[tokio::test]
#[ignore]
async fn test_chromium_scrape() {
    let executable = std::env::var("CHROME_EXECUTABLE").ok().map(Into::into);
    let scraper = BrowserScraper::new(ChromiumLauncher::new(executable, Duration::from_secs(30)));

    let text = scraper
        .scrape("https://example.com/")
        .await
        .expect("Scrape failed");

    assert!(text.contains("Example Domain"));
}

/// Integration test: full extraction against the configured AI provider
///
/// Requires the complete worker environment (AI_API_KEY etc.).
#[tokio::test]
#[ignore]
async fn test_ai_extraction() {
    let config = AppConfig::from_env().expect("Failed to load config");
    let client = OpenAiClient::new(config.ai_client()).expect("Failed to build AI client");
    let extractor = AiExtractor::new(Arc::new(client));

    let link = job_link_pipeline::models::link::ScrapedLink {
        original_request: SubmittedLink::new("https://jobs.example.com/42"),
        url: "https://jobs.example.com/42".to_string(),
        scraped_text: "Initech is hiring a Senior Data Scientist. Hybrid, Austin TX. \
                       Full-time. Posted 2024-03-18. Build forecasting models."
            .to_string(),
    };

    let metadata = extractor.extract(&link).await.expect("Extraction failed");
    assert!(metadata
        .company_name
        .as_deref()
        .is_some_and(|c| c.contains("Initech")));
}
