//! Headless Chromium sessions for the scraper.
//!
//! Each launch gets its own browser process and profile directory. The
//! session closes the browser on `close`; if it is dropped instead (timeout,
//! panic) the process is killed from a spawned task.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent,
};
use chromiumoxide::Page;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::services::scraper::{BrowserLauncher, BrowserSession, ScrapeError};

const BODY_TEXT_JS: &str = "document.body ? document.body.innerText : ''";

#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    executable: Option<PathBuf>,
    request_timeout: Duration,
    user_agent: Option<String>,
}

impl ChromiumLauncher {
    pub fn new(executable: Option<PathBuf>, request_timeout: Duration) -> Self {
        Self {
            executable,
            request_timeout,
            user_agent: None,
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, ScrapeError> {
        let profile_dir =
            std::env::temp_dir().join(format!("job-link-pipeline-{}", Uuid::new_v4()));

        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .request_timeout(self.request_timeout)
            .user_data_dir(&profile_dir)
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .arg("--disable-extensions")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--no-first-run");
        if let Some(path) = &self.executable {
            builder = builder.chrome_executable(path);
        }
        if let Some(agent) = &self.user_agent {
            builder = builder.arg(format!("--user-agent={agent}"));
        }
        let config = builder.build().map_err(ScrapeError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| ScrapeError::Launch(e.to_string()))?;
        let handler_task = tokio::spawn(async move { while handler.next().await.is_some() {} });

        // From here on the guard owns the process, so early returns still clean up.
        let mut session = ChromiumSession {
            browser: Some(browser),
            page: None,
            handler_task,
            tracker_task: None,
            inflight: Arc::new(AtomicUsize::new(0)),
            profile_dir,
        };

        let page = session
            .browser()?
            .new_page("about:blank")
            .await
            .map_err(|e| ScrapeError::Launch(e.to_string()))?;
        session.tracker_task = Some(track_inflight(&page, session.inflight.clone()).await?);
        session.page = Some(page);

        tracing::debug!(profile = %session.profile_dir.display(), "Browser launched");
        Ok(Box::new(session))
    }
}

/// Keeps a running count of in-flight requests from CDP network events.
async fn track_inflight(
    page: &Page,
    inflight: Arc<AtomicUsize>,
) -> Result<JoinHandle<()>, ScrapeError> {
    let listen_err = |e: chromiumoxide::error::CdpError| ScrapeError::Launch(e.to_string());
    let mut started = page
        .event_listener::<EventRequestWillBeSent>()
        .await
        .map_err(listen_err)?;
    let mut finished = page
        .event_listener::<EventLoadingFinished>()
        .await
        .map_err(listen_err)?;
    let mut failed = page
        .event_listener::<EventLoadingFailed>()
        .await
        .map_err(listen_err)?;

    Ok(tokio::spawn(async move {
        let decrement = |counter: &AtomicUsize| {
            let _ = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                Some(n.saturating_sub(1))
            });
        };
        loop {
            tokio::select! {
                Some(_) = started.next() => {
                    inflight.fetch_add(1, Ordering::SeqCst);
                }
                Some(_) = finished.next() => decrement(&inflight),
                Some(_) = failed.next() => decrement(&inflight),
                else => break,
            }
        }
    }))
}

pub struct ChromiumSession {
    browser: Option<Browser>,
    page: Option<Page>,
    handler_task: JoinHandle<()>,
    tracker_task: Option<JoinHandle<()>>,
    inflight: Arc<AtomicUsize>,
    profile_dir: PathBuf,
}

impl ChromiumSession {
    fn browser(&self) -> Result<&Browser, ScrapeError> {
        self.browser
            .as_ref()
            .ok_or_else(|| ScrapeError::Launch("browser already closed".to_string()))
    }

    fn page(&self) -> Result<&Page, ScrapeError> {
        self.page
            .as_ref()
            .ok_or_else(|| ScrapeError::Evaluation("no page open".to_string()))
    }

    fn stop_tasks(&mut self) {
        self.handler_task.abort();
        if let Some(task) = self.tracker_task.take() {
            task.abort();
        }
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn navigate(&mut self, url: &str) -> Result<Option<u16>, ScrapeError> {
        let page = self.page()?;
        page.goto(url.to_string())
            .await
            .map_err(|e| ScrapeError::Navigation(e.to_string()))?;

        let request = page
            .wait_for_navigation_response()
            .await
            .map_err(|e| ScrapeError::Navigation(e.to_string()))?;

        let status = request
            .as_ref()
            .and_then(|req| req.response.as_ref())
            .and_then(|resp| u16::try_from(resp.status).ok());
        tracing::debug!(url, status, "Navigation complete");
        Ok(status)
    }

    fn inflight_requests(&self) -> usize {
        self.inflight.load(Ordering::SeqCst)
    }

    async fn body_text(&mut self) -> Result<String, ScrapeError> {
        self.page()?
            .evaluate(BODY_TEXT_JS)
            .await
            .map_err(|e| ScrapeError::Evaluation(e.to_string()))?
            .into_value::<String>()
            .map_err(|e| ScrapeError::Evaluation(e.to_string()))
    }

    async fn html(&mut self) -> Result<String, ScrapeError> {
        self.page()?
            .content()
            .await
            .map_err(|e| ScrapeError::Evaluation(e.to_string()))
    }

    async fn close(mut self: Box<Self>) -> Result<(), ScrapeError> {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                tracing::debug!(error = %e, "Page close failed, closing browser anyway");
            }
        }

        let result = match self.browser.take() {
            Some(mut browser) => {
                let closed = browser
                    .close()
                    .await
                    .map(|_| ())
                    .map_err(|e| ScrapeError::Launch(format!("close failed: {e}")));
                if closed.is_err() {
                    let _ = browser.kill().await;
                } else {
                    let _ = browser.wait().await;
                }
                closed
            }
            None => Ok(()),
        };

        self.stop_tasks();
        let _ = tokio::fs::remove_dir_all(&self.profile_dir).await;
        result
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        self.stop_tasks();

        let Some(mut browser) = self.browser.take() else {
            return;
        };

        tracing::warn!(profile = %self.profile_dir.display(), "Browser session dropped without close, killing");
        let profile_dir = std::mem::take(&mut self.profile_dir);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let _ = browser.kill().await;
                    let _ = tokio::fs::remove_dir_all(&profile_dir).await;
                });
            }
            Err(_) => {
                // No runtime left: dropping the browser drops its child handle.
                drop(browser);
                let _ = std::fs::remove_dir_all(&profile_dir);
            }
        }
    }
}
