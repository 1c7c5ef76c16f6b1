//! Link-processing pipeline.
//!
//! One run moves a submitted link through
//! `RECEIVED → VALIDATING → DEDUPLICATING → SCRAPING → EXTRACTING` and ends in
//! `SUCCEEDED` or `FAILED(stage)`. Each stage either hands the next stage its
//! input or returns the finished [`FailedProcessedLink`]; the first failure
//! ends the run. Only scraping and extraction are retried within a run.

use std::sync::Arc;
use std::time::Instant;
use strum::Display;
use tracing::Instrument;

use crate::models::link::{
    ErrorKind, FailedProcessedLink, FailureStage, PipelineResult, ProcessedLink, ScrapedLink,
    StageError, SubmittedLink, ValidatedLink,
};
use crate::models::job::ExtractedLinkMetadata;
use crate::services::ai::AiError;
use crate::services::dedup::{DedupError, Deduplicator, LinkLookup};
use crate::services::extraction::{ExtractionError, MetadataExtractor};
use crate::services::normalize::normalize;
use crate::services::retry::{Classify, RetryEngine, RetryPolicy, Sleeper, TokioSleeper};
use crate::services::scraper::{PageScraper, ScrapeError};
use crate::services::validation::{validate, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    Received,
    Validating,
    Deduplicating,
    Scraping,
    Extracting,
    Succeeded,
    Failed,
}

type StageResult<T> = Result<T, FailedProcessedLink>;

pub struct LinkPipeline {
    dedup: Deduplicator,
    scraper: Arc<dyn PageScraper>,
    extractor: Arc<dyn MetadataExtractor>,
    scrape_policy: RetryPolicy,
    extract_policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl LinkPipeline {
    pub fn new(
        lookup: Arc<dyn LinkLookup>,
        scraper: Arc<dyn PageScraper>,
        extractor: Arc<dyn MetadataExtractor>,
    ) -> Self {
        Self {
            dedup: Deduplicator::new(lookup),
            scraper,
            extractor,
            scrape_policy: RetryPolicy::default(),
            extract_policy: RetryPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_scrape_policy(mut self, policy: RetryPolicy) -> Self {
        self.scrape_policy = policy;
        self
    }

    pub fn with_extract_policy(mut self, policy: RetryPolicy) -> Self {
        self.extract_policy = policy;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Run a raw URL through the pipeline as a fresh submission.
    pub async fn process_url(&self, raw: &str) -> PipelineResult {
        self.process(SubmittedLink::new(raw)).await.to_result()
    }

    /// Run one submission through every stage. Never fails; the outcome is
    /// either the extracted metadata or a record of the failing stage.
    pub async fn process(&self, link: SubmittedLink) -> ProcessedLink {
        let span = tracing::info_span!(
            "link_pipeline",
            link_id = %link.id,
            run = link.attempts_count + 1
        );
        async move {
            let start = Instant::now();
            transition(PipelineState::Received, &link.original_url);

            let processed = match self.run_stages(link).await {
                Ok((link, metadata)) => ProcessedLink::Succeeded { link, metadata },
                Err(failed) => ProcessedLink::Failed(failed),
            };

            record_outcome(&processed, start);
            processed
        }
        .instrument(span)
        .await
    }

    async fn run_stages(
        &self,
        link: SubmittedLink,
    ) -> StageResult<(ScrapedLink, ExtractedLinkMetadata)> {
        transition(PipelineState::Validating, &link.original_url);
        let validated = timed(FailureStage::Validation, async { validate_stage(link) }).await?;

        transition(PipelineState::Deduplicating, &validated.url);
        let validated = timed(FailureStage::Duplicate, self.dedup_stage(validated)).await?;

        transition(PipelineState::Scraping, &validated.url);
        let scraped = timed(FailureStage::Scraping, self.scrape_stage(validated)).await?;

        transition(PipelineState::Extracting, &scraped.url);
        let metadata = timed(FailureStage::Extraction, self.extract_stage(&scraped)).await;
        match metadata {
            Ok(metadata) => Ok((scraped, metadata)),
            Err(error) => Err(FailedProcessedLink::new(
                scraped.original_request,
                FailureStage::Extraction,
                error,
            )
            .with_url(scraped.url)
            .with_scraped_text(scraped.scraped_text)),
        }
    }

    async fn dedup_stage(&self, link: ValidatedLink) -> StageResult<ValidatedLink> {
        let original = link.original_request.original_url.trim();
        match self.dedup.ensure_unique(original, &link.url).await {
            Ok(()) => Ok(link),
            Err(e) => {
                let error = dedup_stage_error(&e);
                Err(
                    FailedProcessedLink::new(link.original_request, FailureStage::Duplicate, error)
                        .with_url(link.url),
                )
            }
        }
    }

    async fn scrape_stage(&self, link: ValidatedLink) -> StageResult<ScrapedLink> {
        let engine = RetryEngine::<ScrapeError>::classified(&self.scrape_policy, self.sleeper.as_ref())
            .named("scrape");
        let url = link.url.as_str();
        let scraper = self.scraper.as_ref();

        let outcome = engine
            .run(|attempt| {
                tracing::debug!(url, attempt, "Scrape attempt");
                scraper.scrape(url)
            })
            .await;

        match outcome {
            Ok(text) => Ok(ScrapedLink::new(link, text)),
            Err(e) => {
                let error = scrape_stage_error(&e);
                Err(
                    FailedProcessedLink::new(link.original_request, FailureStage::Scraping, error)
                        .with_url(link.url),
                )
            }
        }
    }

    async fn extract_stage(&self, link: &ScrapedLink) -> Result<ExtractedLinkMetadata, StageError> {
        let engine =
            RetryEngine::<ExtractionError>::classified(&self.extract_policy, self.sleeper.as_ref())
                .named("extract");
        let extractor = self.extractor.as_ref();

        engine
            .run(|attempt| {
                tracing::debug!(url = %link.url, attempt, "Extraction attempt");
                extractor.extract(link)
            })
            .await
            .map_err(|e| extraction_stage_error(&e))
    }
}

/// Canonicalize first so wrapped links (`<https://...>`) are judged on the
/// URL inside the wrapping.
fn validate_stage(link: SubmittedLink) -> StageResult<ValidatedLink> {
    match validate(&normalize(&link.original_url)) {
        Ok(url) => Ok(ValidatedLink {
            url,
            original_request: link,
        }),
        Err(e) => Err(FailedProcessedLink::new(
            link,
            FailureStage::Validation,
            validation_stage_error(&e),
        )),
    }
}

fn validation_stage_error(e: &ValidationError) -> StageError {
    StageError::new(ErrorKind::Validation, e.to_string(), false)
}

/// Lookup outages are not duplicates; a later run may get an answer.
pub fn dedup_stage_error(e: &DedupError) -> StageError {
    match e {
        DedupError::Duplicate { .. } => StageError::new(ErrorKind::DuplicateResource, e.to_string(), false),
        DedupError::Lookup(_) => StageError::new(ErrorKind::LookupFailed, e.to_string(), true),
    }
}

pub fn scrape_stage_error(e: &ScrapeError) -> StageError {
    let kind = match e {
        ScrapeError::Forbidden { .. } => ErrorKind::ForbiddenScrape,
        ScrapeError::RateLimited { .. } => ErrorKind::RateLimited,
        _ => ErrorKind::Scraping,
    };
    StageError::new(kind, e.to_string(), e.is_retryable())
}

pub fn extraction_stage_error(e: &ExtractionError) -> StageError {
    let kind = match e {
        ExtractionError::Ai(AiError::RateLimited { .. }) => ErrorKind::RateLimited,
        _ => ErrorKind::Extraction,
    };
    StageError::new(kind, e.to_string(), e.is_retryable())
}

fn transition(state: PipelineState, url: &str) {
    tracing::info!(state = %state, url, "Pipeline state");
}

async fn timed<T, E>(stage: FailureStage, fut: impl std::future::Future<Output = Result<T, E>>) -> Result<T, E> {
    let start = Instant::now();
    let result = fut.await;
    metrics::histogram!("link_stage_duration_seconds", "stage" => stage.to_string())
        .record(start.elapsed().as_secs_f64());
    result
}

fn record_outcome(processed: &ProcessedLink, start: Instant) {
    let duration_ms = start.elapsed().as_millis() as u64;
    match processed {
        ProcessedLink::Succeeded { link, metadata } => {
            metrics::counter!("link_pipeline_runs_total", "status" => "success").increment(1);
            tracing::info!(
                state = %PipelineState::Succeeded,
                url = %link.url,
                job_title = metadata.job_title.as_deref().unwrap_or(""),
                company = metadata.company_name.as_deref().unwrap_or(""),
                duration_ms,
                "Pipeline state"
            );
        }
        ProcessedLink::Failed(failed) => {
            metrics::counter!("link_pipeline_runs_total", "status" => "failed").increment(1);
            metrics::counter!("link_pipeline_failures_total", "stage" => failed.failure_stage.to_string())
                .increment(1);
            tracing::warn!(
                state = %PipelineState::Failed,
                stage = %failed.failure_stage,
                url = failed.reported_url(),
                kind = %failed.error.kind,
                retryable = failed.error.retryable,
                error = %failed.error.message,
                duration_ms,
                "Pipeline state"
            );
        }
    }
}
