use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;

use crate::models::link::LinkRecord;
use crate::services::token::ServiceTokenSigner;

/// Read access to links already held by the store.
#[async_trait]
pub trait LinkLookup: Send + Sync {
    async fn find_link_by_url(&self, url: &str) -> Result<Option<LinkRecord>, LookupError>;
}

/// `GET {lookup_url}?url=...` against the store's lookup endpoint.
pub struct HttpLinkLookup {
    http: Client,
    lookup_url: String,
    signer: Arc<ServiceTokenSigner>,
}

impl HttpLinkLookup {
    pub fn new(
        lookup_url: impl Into<String>,
        signer: Arc<ServiceTokenSigner>,
        timeout: Duration,
    ) -> Result<Self, LookupError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            lookup_url: lookup_url.into(),
            signer,
        })
    }
}

#[async_trait]
impl LinkLookup for HttpLinkLookup {
    async fn find_link_by_url(&self, url: &str) -> Result<Option<LinkRecord>, LookupError> {
        let token = self.signer.create_token()?;
        let response = self
            .http
            .get(&self.lookup_url)
            .query(&[("url", url)])
            .bearer_auth(token)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(Some(response.json::<LinkRecord>().await?)),
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(LookupError::UnexpectedStatus {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }
}

/// Advisory duplicate check ahead of the expensive stages.
///
/// Races are possible; the store enforces uniqueness on deposit.
pub struct Deduplicator {
    lookup: Arc<dyn LinkLookup>,
}

impl Deduplicator {
    pub fn new(lookup: Arc<dyn LinkLookup>) -> Self {
        Self { lookup }
    }

    /// Checks the normalized URL, then the original if it differs.
    pub async fn ensure_unique(&self, original: &str, normalized: &str) -> Result<(), DedupError> {
        let mut candidates = vec![normalized];
        if original != normalized {
            candidates.push(original);
        }

        for candidate in candidates {
            if let Some(existing) = self.lookup.find_link_by_url(candidate).await? {
                tracing::info!(
                    url = candidate,
                    existing_id = %existing.id,
                    "Link already in store"
                );
                return Err(DedupError::Duplicate {
                    url: candidate.to_string(),
                    existing_id: existing.id,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("Lookup request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Lookup returned HTTP {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("Failed to sign lookup token: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum DedupError {
    #[error("Link already exists as {existing_id}: {url}")]
    Duplicate { url: String, existing_id: String },

    #[error("Duplicate check unavailable: {0}")]
    Lookup(#[from] LookupError),
}
