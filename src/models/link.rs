use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::models::job::ExtractedLinkMetadata;

/// A user submission awaiting processing.
///
/// `attempts_count` is owned by the long-horizon scheduler (the worker) and is
/// only ever incremented between pipeline runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedLink {
    pub id: Uuid,
    pub original_url: String,
    #[serde(default)]
    pub attempts_count: u32,
}

impl SubmittedLink {
    /// Fresh submission with no prior attempts.
    pub fn new(original_url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            original_url: original_url.into(),
            attempts_count: 0,
        }
    }

    /// Copy of this submission with the attempt counter bumped.
    pub fn next_attempt(&self) -> Self {
        Self {
            attempts_count: self.attempts_count.saturating_add(1),
            ..self.clone()
        }
    }
}

/// A submission whose URL passed validation and normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedLink {
    pub original_request: SubmittedLink,
    pub url: String,
}

/// A validated link plus the visible text of the rendered page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapedLink {
    pub original_request: SubmittedLink,
    pub url: String,
    pub scraped_text: String,
}

impl ScrapedLink {
    pub fn new(validated: ValidatedLink, scraped_text: String) -> Self {
        Self {
            original_request: validated.original_request,
            url: validated.url,
            scraped_text,
        }
    }
}

/// Coarse outcome tag returned to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkProcessingStatus {
    Success,
    Failed,
}

/// Pipeline stage at which a run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "snake_case")]
pub enum FailureStage {
    Validation,
    Duplicate,
    Scraping,
    Extraction,
}

/// Error taxonomy shared by all stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    DuplicateResource,
    LookupFailed,
    ForbiddenScrape,
    Scraping,
    RateLimited,
    Extraction,
}

/// Serializable description of a stage failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageError {
    pub kind: ErrorKind,
    pub message: String,
    /// Whether a later pipeline run could plausibly succeed.
    pub retryable: bool,
}

impl StageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable,
        }
    }
}

/// Terminal failure record for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedProcessedLink {
    pub original_request: SubmittedLink,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scraped_text: Option<String>,
    pub status: LinkProcessingStatus,
    pub failure_stage: FailureStage,
    pub error: StageError,
}

impl FailedProcessedLink {
    pub fn new(
        original_request: SubmittedLink,
        failure_stage: FailureStage,
        error: StageError,
    ) -> Self {
        Self {
            original_request,
            url: None,
            scraped_text: None,
            status: LinkProcessingStatus::Failed,
            failure_stage,
            error,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_scraped_text(mut self, text: impl Into<String>) -> Self {
        self.scraped_text = Some(text.into());
        self
    }

    /// URL reported downstream: the validated one when available, else the raw submission.
    pub fn reported_url(&self) -> &str {
        self.url
            .as_deref()
            .unwrap_or(&self.original_request.original_url)
    }
}

/// Outcome of one pipeline run, with full context for the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessedLink {
    Succeeded {
        link: ScrapedLink,
        metadata: ExtractedLinkMetadata,
    },
    Failed(FailedProcessedLink),
}

impl ProcessedLink {
    pub fn status(&self) -> LinkProcessingStatus {
        match self {
            ProcessedLink::Succeeded { .. } => LinkProcessingStatus::Success,
            ProcessedLink::Failed(_) => LinkProcessingStatus::Failed,
        }
    }

    pub fn original_request(&self) -> &SubmittedLink {
        match self {
            ProcessedLink::Succeeded { link, .. } => &link.original_request,
            ProcessedLink::Failed(failed) => &failed.original_request,
        }
    }

    /// Wire result handed to the deposit collaborator.
    pub fn to_result(&self) -> PipelineResult {
        match self {
            ProcessedLink::Succeeded { link, metadata } => PipelineResult::Success {
                url: link.url.clone(),
                metadata: metadata.clone(),
            },
            ProcessedLink::Failed(failed) => PipelineResult::Failed {
                url: failed.reported_url().to_string(),
                failure_stage: failed.failure_stage,
                error: failed.error.clone(),
            },
        }
    }
}

/// Result object deposited into the central store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "linkProcessingStatus", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineResult {
    Success {
        url: String,
        #[serde(flatten)]
        metadata: ExtractedLinkMetadata,
    },
    #[serde(rename_all = "camelCase")]
    Failed {
        url: String,
        failure_stage: FailureStage,
        error: StageError,
    },
}

impl PipelineResult {
    pub fn url(&self) -> &str {
        match self {
            PipelineResult::Success { url, .. } | PipelineResult::Failed { url, .. } => url,
        }
    }

    pub fn link_processing_status(&self) -> LinkProcessingStatus {
        match self {
            PipelineResult::Success { .. } => LinkProcessingStatus::Success,
            PipelineResult::Failed { .. } => LinkProcessingStatus::Failed,
        }
    }
}

/// Record returned by the external link store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkRecord {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub original_url: Option<String>,
}

/// Long-horizon scheduling decision after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "snake_case")]
pub enum LinkRetryStatus {
    PendingRetry,
    Failed,
}
