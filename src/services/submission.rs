use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;

use crate::models::link::PipelineResult;
use crate::services::token::ServiceTokenSigner;

/// Hands pipeline results to the deposit service.
pub struct DepositClient {
    http: Client,
    deposit_url: String,
    signer: Arc<ServiceTokenSigner>,
}

impl DepositClient {
    pub fn new(
        deposit_url: impl Into<String>,
        signer: Arc<ServiceTokenSigner>,
        timeout: Duration,
    ) -> Result<Self, SubmissionError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            deposit_url: deposit_url.into(),
            signer,
        })
    }

    /// POST the result. Only `201 Created` counts as deposited.
    pub async fn submit(&self, result: &PipelineResult) -> Result<(), SubmissionError> {
        let outcome = self.post(result).await;

        let status = if outcome.is_ok() { "deposited" } else { "error" };
        metrics::counter!("link_submissions_total", "status" => status).increment(1);

        match &outcome {
            Ok(()) => tracing::info!(
                url = result.url(),
                link_status = %result.link_processing_status(),
                "Result deposited"
            ),
            Err(e) => tracing::warn!(url = result.url(), error = %e, "Deposit failed"),
        }
        outcome
    }

    async fn post(&self, result: &PipelineResult) -> Result<(), SubmissionError> {
        let token = self.signer.create_token()?;
        let response = self
            .http
            .post(&self.deposit_url)
            .bearer_auth(token)
            .json(result)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::CREATED {
            let body = response.text().await.unwrap_or_default();
            return Err(SubmissionError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("Failed to sign deposit token: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("Deposit request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Deposit returned HTTP {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },
}
