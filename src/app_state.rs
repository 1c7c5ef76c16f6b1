use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::services::{
    ai::OpenAiClient,
    browser::ChromiumLauncher,
    dedup::HttpLinkLookup,
    extraction::AiExtractor,
    pipeline::LinkPipeline,
    queue::JobQueue,
    scraper::BrowserScraper,
    submission::DepositClient,
    token::ServiceTokenSigner,
};

const STORE_TIMEOUT: Duration = Duration::from_secs(15);

/// Long-lived services shared by the worker loop.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<LinkPipeline>,
    pub queue: Arc<JobQueue>,
    pub deposit: Arc<DepositClient>,
    /// Pipeline runs per link before it is deposited as failed.
    pub link_max_attempts: u32,
}

impl AppState {
    pub fn new(
        pipeline: LinkPipeline,
        queue: JobQueue,
        deposit: DepositClient,
        link_max_attempts: u32,
    ) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            queue: Arc::new(queue),
            deposit: Arc::new(deposit),
            link_max_attempts,
        }
    }

    /// Wire the production services described by `config`.
    pub fn from_config(config: &AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let signer = Arc::new(ServiceTokenSigner::new(
            &config.service_token_secret,
            config.service_token_issuer.clone(),
            config.service_token_audience.clone(),
        ));

        let lookup = HttpLinkLookup::new(config.lookup_url.clone(), signer.clone(), STORE_TIMEOUT)?;
        let deposit = DepositClient::new(config.deposit_url.clone(), signer, STORE_TIMEOUT)?;

        let launcher = ChromiumLauncher::new(
            config.chrome_executable.clone(),
            Duration::from_secs(config.scrape_timeout_secs),
        );
        let scraper = BrowserScraper::new(launcher);

        let ai = OpenAiClient::new(config.ai_client())?;
        tracing::info!(model = ai.model(), "AI client ready");
        let extractor = AiExtractor::new(Arc::new(ai))
            .with_max_prompt_chars(config.prompt_max_chars)
            .with_min_score(config.ai_min_score);

        let pipeline = LinkPipeline::new(Arc::new(lookup), Arc::new(scraper), Arc::new(extractor))
            .with_scrape_policy(config.scrape_retry_policy())
            .with_extract_policy(config.extract_retry_policy());

        let queue = JobQueue::new(&config.redis_url)?;

        Ok(Self::new(pipeline, queue, deposit, config.link_max_attempts))
    }
}
