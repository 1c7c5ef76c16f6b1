//! Fakes with call counters for pipeline and scraper tests
#![allow(dead_code)]

use async_trait::async_trait;
use job_link_pipeline::{
    models::job::ExtractedLinkMetadata,
    models::link::{LinkRecord, ScrapedLink},
    services::{
        dedup::{LinkLookup, LookupError},
        extraction::{ExtractionError, MetadataExtractor},
        retry::{RetryPolicy, Sleeper},
        scraper::{BrowserLauncher, BrowserSession, PageScraper, ScrapeError},
    },
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Retry policy with tiny delays and no jitter.
pub fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(100),
        multiplier: 2.0,
        jitter: 0.0,
        rate_limit_delay: Duration::from_millis(500),
        attempt_timeout: None,
        max_elapsed: None,
    }
}

/// Records requested delays instead of sleeping.
#[derive(Default)]
pub struct RecordingSleeper {
    pub delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
    }
}

/// Link store lookup backed by a map.
#[derive(Default)]
pub struct FakeLookup {
    pub known: HashMap<String, String>,
    pub unavailable: bool,
    pub calls: AtomicUsize,
}

impl FakeLookup {
    pub fn with_link(url: &str, id: &str) -> Self {
        let mut known = HashMap::new();
        known.insert(url.to_string(), id.to_string());
        Self {
            known,
            ..Default::default()
        }
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LinkLookup for FakeLookup {
    async fn find_link_by_url(&self, url: &str) -> Result<Option<LinkRecord>, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            return Err(LookupError::UnexpectedStatus {
                status: 503,
                body: "store unavailable".to_string(),
            });
        }
        Ok(self.known.get(url).map(|id| LinkRecord {
            id: id.clone(),
            url: url.to_string(),
            original_url: None,
        }))
    }
}

/// Scraper that replays scripted outcomes, repeating the last one.
pub struct FakeScraper {
    outcomes: Mutex<VecDeque<Result<String, ScrapeError>>>,
    last: Mutex<Option<Result<String, ScrapeError>>>,
    pub calls: AtomicUsize,
}

impl FakeScraper {
    pub fn returning(text: &str) -> Self {
        Self::scripted(vec![Ok(text.to_string())])
    }

    pub fn failing(error: ScrapeError) -> Self {
        Self::scripted(vec![Err(error)])
    }

    pub fn scripted(outcomes: Vec<Result<String, ScrapeError>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn clone_scrape(outcome: &Result<String, ScrapeError>) -> Result<String, ScrapeError> {
    match outcome {
        Ok(text) => Ok(text.clone()),
        Err(ScrapeError::Forbidden { url }) => Err(ScrapeError::Forbidden { url: url.clone() }),
        Err(ScrapeError::RateLimited { url }) => Err(ScrapeError::RateLimited { url: url.clone() }),
        Err(ScrapeError::HttpStatus { status, url }) => Err(ScrapeError::HttpStatus {
            status: *status,
            url: url.clone(),
        }),
        Err(ScrapeError::EmptyContent { url }) => {
            Err(ScrapeError::EmptyContent { url: url.clone() })
        }
        Err(other) => Err(ScrapeError::Navigation(other.to_string())),
    }
}

#[async_trait]
impl PageScraper for FakeScraper {
    async fn scrape(&self, _url: &str) -> Result<String, ScrapeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.outcomes.lock().unwrap().pop_front();
        match next {
            Some(outcome) => {
                *self.last.lock().unwrap() = Some(clone_scrape(&outcome));
                outcome
            }
            None => match &*self.last.lock().unwrap() {
                Some(outcome) => clone_scrape(outcome),
                None => Err(ScrapeError::Navigation("no scripted outcome".to_string())),
            },
        }
    }
}

/// Extractor returning fixed metadata or a fixed failure.
pub struct FakeExtractor {
    metadata: Option<ExtractedLinkMetadata>,
    failure: fn() -> ExtractionError,
    pub calls: AtomicUsize,
    pub seen: Mutex<Vec<ScrapedLink>>,
}

impl FakeExtractor {
    pub fn returning(metadata: ExtractedLinkMetadata) -> Self {
        Self {
            metadata: Some(metadata),
            failure: || ExtractionError::Schema("unused".to_string()),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(failure: fn() -> ExtractionError) -> Self {
        Self {
            metadata: None,
            failure,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataExtractor for FakeExtractor {
    async fn extract(&self, link: &ScrapedLink) -> Result<ExtractedLinkMetadata, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(link.clone());
        match &self.metadata {
            Some(metadata) => Ok(metadata.clone()),
            None => Err((self.failure)()),
        }
    }
}

/// What a fake browser page does when driven.
#[derive(Debug, Clone)]
pub struct FakePage {
    pub status: Option<u16>,
    pub body_text: String,
    pub html: String,
    pub navigation_error: Option<String>,
    /// Never returns from navigation (for timeout tests).
    pub hang: bool,
}

impl FakePage {
    pub fn ok(body_text: &str) -> Self {
        Self {
            status: Some(200),
            body_text: body_text.to_string(),
            html: String::new(),
            navigation_error: None,
            hang: false,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status: Some(status),
            ..Self::ok("Access denied")
        }
    }
}

/// Counts launched and closed sessions; every session serves `page`.
pub struct FakeLauncher {
    page: FakePage,
    pub launched: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
}

impl FakeLauncher {
    pub fn new(page: FakePage) -> Self {
        Self {
            page,
            launched: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn launched(&self) -> usize {
        self.launched.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, ScrapeError> {
        self.launched.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            page: self.page.clone(),
            closed: self.closed.clone(),
            released: false,
        }))
    }
}

/// Counts a release on explicit close or, failing that, on drop.
pub struct FakeSession {
    page: FakePage,
    closed: Arc<AtomicUsize>,
    released: bool,
}

impl FakeSession {
    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn navigate(&mut self, _url: &str) -> Result<Option<u16>, ScrapeError> {
        if self.page.hang {
            std::future::pending::<()>().await;
        }
        if let Some(message) = &self.page.navigation_error {
            return Err(ScrapeError::Navigation(message.clone()));
        }
        Ok(self.page.status)
    }

    fn inflight_requests(&self) -> usize {
        0
    }

    async fn body_text(&mut self) -> Result<String, ScrapeError> {
        Ok(self.page.body_text.clone())
    }

    async fn html(&mut self) -> Result<String, ScrapeError> {
        Ok(self.page.html.clone())
    }

    async fn close(mut self: Box<Self>) -> Result<(), ScrapeError> {
        self.release();
        Ok(())
    }
}
