use async_trait::async_trait;
use scraper::{Html, Node, Selector};
use std::time::Duration;
use tokio::time::Instant;

use crate::services::retry::{AttemptTimeout, Classify, ErrorClass};

/// Elements whose text never reaches the rendered page.
const INVISIBLE_ELEMENTS: &[&str] = &["script", "style", "noscript", "template", "head"];

/// Loads a page and returns its visible text. Does not retry.
#[async_trait]
pub trait PageScraper: Send + Sync {
    async fn scrape(&self, url: &str) -> Result<String, ScrapeError>;
}

/// Starts an isolated browser for one scrape.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, ScrapeError>;
}

/// One live browser with a single page.
///
/// Implementations must release the underlying process when dropped without
/// `close` (cancelled futures, panics).
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Navigate and report the main document's HTTP status when known.
    async fn navigate(&mut self, url: &str) -> Result<Option<u16>, ScrapeError>;

    /// Requests started but not yet finished or failed.
    fn inflight_requests(&self) -> usize;

    /// `document.body.innerText` of the current page.
    async fn body_text(&mut self) -> Result<String, ScrapeError>;

    /// Serialized DOM of the current page.
    async fn html(&mut self) -> Result<String, ScrapeError>;

    async fn close(self: Box<Self>) -> Result<(), ScrapeError>;
}

/// "Network idle" heuristic: at most `max_inflight` requests for `idle_window`.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkIdle {
    pub max_inflight: usize,
    pub idle_window: Duration,
    pub poll_interval: Duration,
    /// Give up waiting (and read whatever rendered) after this long.
    pub max_wait: Duration,
}

impl Default for NetworkIdle {
    fn default() -> Self {
        Self {
            max_inflight: 2,
            idle_window: Duration::from_millis(500),
            poll_interval: Duration::from_millis(100),
            max_wait: Duration::from_secs(15),
        }
    }
}

/// Scraper that drives a headless browser through a [`BrowserLauncher`].
pub struct BrowserScraper<L> {
    launcher: L,
    idle: NetworkIdle,
}

impl<L: BrowserLauncher> BrowserScraper<L> {
    pub fn new(launcher: L) -> Self {
        Self {
            launcher,
            idle: NetworkIdle::default(),
        }
    }

    pub fn with_network_idle(mut self, idle: NetworkIdle) -> Self {
        self.idle = idle;
        self
    }

    async fn read_page(
        &self,
        session: &mut dyn BrowserSession,
        url: &str,
    ) -> Result<String, ScrapeError> {
        if let Some(status) = session.navigate(url).await? {
            check_status(status, url)?;
        }

        let settled = wait_for_network_idle(&*session, &self.idle).await;
        if !settled {
            tracing::debug!(url, "Network never went idle, reading page anyway");
        }

        let mut text = session.body_text().await?;
        if text.trim().is_empty() {
            tracing::debug!(url, "innerText empty, falling back to DOM text");
            text = visible_text(&session.html().await?);
        }

        let text = text.trim();
        if text.is_empty() {
            return Err(ScrapeError::EmptyContent {
                url: url.to_string(),
            });
        }
        Ok(text.to_string())
    }
}

#[async_trait]
impl<L: BrowserLauncher> PageScraper for BrowserScraper<L> {
    async fn scrape(&self, url: &str) -> Result<String, ScrapeError> {
        let start = std::time::Instant::now();
        let mut session = self.launcher.launch().await?;

        let outcome = self.read_page(session.as_mut(), url).await;

        // Release the browser whatever happened above.
        if let Err(e) = session.close().await {
            tracing::warn!(url, error = %e, "Failed to close browser cleanly");
        }

        match &outcome {
            Ok(text) => tracing::info!(
                url,
                chars = text.len(),
                duration_ms = start.elapsed().as_millis() as u64,
                "Page scraped"
            ),
            Err(e) => tracing::warn!(url, error = %e, "Scrape failed"),
        }
        outcome
    }
}

/// Map a main-document HTTP status onto the scrape error taxonomy.
pub fn check_status(status: u16, url: &str) -> Result<(), ScrapeError> {
    match status {
        403 => Err(ScrapeError::Forbidden {
            url: url.to_string(),
        }),
        429 => Err(ScrapeError::RateLimited {
            url: url.to_string(),
        }),
        s if s >= 400 => Err(ScrapeError::HttpStatus {
            status: s,
            url: url.to_string(),
        }),
        _ => Ok(()),
    }
}

/// Poll the session until the network is idle or `max_wait` passes.
/// Returns whether idle was reached.
pub async fn wait_for_network_idle(session: &dyn BrowserSession, idle: &NetworkIdle) -> bool {
    let started = Instant::now();
    let mut idle_since: Option<Instant> = None;

    loop {
        let now = Instant::now();
        if session.inflight_requests() <= idle.max_inflight {
            let since = *idle_since.get_or_insert(now);
            if now.duration_since(since) >= idle.idle_window {
                return true;
            }
        } else {
            idle_since = None;
        }

        if now.duration_since(started) >= idle.max_wait {
            return false;
        }
        tokio::time::sleep(idle.poll_interval).await;
    }
}

/// Visible text of an HTML document, one text run per line.
pub fn visible_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let body_sel = Selector::parse("body").expect("valid selector");

    let Some(body) = document.select(&body_sel).next() else {
        return String::new();
    };

    let mut lines = Vec::new();
    for node in body.descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|el| INVISIBLE_ELEMENTS.contains(&el.name()))
        });
        if hidden {
            continue;
        }
        let line = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if !line.is_empty() {
            lines.push(line);
        }
    }
    lines.join("\n")
}

#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("Target site refused access (HTTP 403): {url}")]
    Forbidden { url: String },

    #[error("Target site is rate limiting (HTTP 429): {url}")]
    RateLimited { url: String },

    #[error("Target returned HTTP {status}: {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Failed to launch browser: {0}")]
    Launch(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Page evaluation failed: {0}")]
    Evaluation(String),

    #[error("Page has no visible text: {url}")]
    EmptyContent { url: String },

    #[error("Scrape timed out after {0:?}")]
    Timeout(Duration),
}

impl Classify for ScrapeError {
    fn class(&self) -> ErrorClass {
        match self {
            ScrapeError::Forbidden { .. } => ErrorClass::Terminal,
            ScrapeError::RateLimited { .. } => ErrorClass::RateLimited,
            _ => ErrorClass::Transient,
        }
    }
}

impl From<AttemptTimeout> for ScrapeError {
    fn from(timeout: AttemptTimeout) -> Self {
        ScrapeError::Timeout(timeout.0)
    }
}
