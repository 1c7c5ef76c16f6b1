use async_trait::async_trait;
use chrono::NaiveDate;
use garde::Validate;
use std::sync::Arc;

use crate::models::job::{
    AiJobExtraction, ClosedSet, ExtractedLinkMetadata, JobFunction, JobLocation, JobType,
};
use crate::models::link::ScrapedLink;
use crate::services::ai::{response_schema, AiError, CompletionClient, CompletionRequest};
use crate::services::retry::{AttemptTimeout, Classify, ErrorClass};

/// Default budget for scraped text embedded in the prompt.
pub const DEFAULT_PROMPT_MAX_CHARS: usize = 30_000;

const SCHEMA_NAME: &str = "job_posting_extraction";

const SYSTEM_PROMPT: &str = concat!(
    "You extract structured metadata from job postings. ",
    "Only report what the page states; use null for anything not present. ",
    "Never invent companies, titles or dates."
);

/// Turns scraped page text into job metadata.
#[async_trait]
pub trait MetadataExtractor: Send + Sync {
    async fn extract(&self, link: &ScrapedLink) -> Result<ExtractedLinkMetadata, ExtractionError>;
}

/// Checks raw model JSON and turns it into a typed extraction.
pub trait ResponseValidator: Send + Sync {
    fn validate(&self, raw: &str) -> Result<AiJobExtraction, ExtractionError>;
}

/// Deserializes and enforces the garde rules (score range, length bounds).
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaValidator;

impl ResponseValidator for SchemaValidator {
    fn validate(&self, raw: &str) -> Result<AiJobExtraction, ExtractionError> {
        let extraction: AiJobExtraction =
            serde_json::from_str(raw).map_err(ExtractionError::Malformed)?;
        let extraction = extraction.without_blanks();
        extraction
            .validate()
            .map_err(|report| ExtractionError::Schema(report.to_string()))?;
        Ok(extraction)
    }
}

/// Deserializes only. For tests and fakes that produce arbitrary scores.
#[derive(Debug, Clone, Copy, Default)]
pub struct LenientValidator;

impl ResponseValidator for LenientValidator {
    fn validate(&self, raw: &str) -> Result<AiJobExtraction, ExtractionError> {
        let extraction: AiJobExtraction =
            serde_json::from_str(raw).map_err(ExtractionError::Malformed)?;
        Ok(extraction.without_blanks())
    }
}

/// Extractor backed by a structured-output completion call.
pub struct AiExtractor {
    client: Arc<dyn CompletionClient>,
    validator: Arc<dyn ResponseValidator>,
    max_prompt_chars: usize,
    min_score: Option<f64>,
}

impl AiExtractor {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self {
            client,
            validator: Arc::new(SchemaValidator),
            max_prompt_chars: DEFAULT_PROMPT_MAX_CHARS,
            min_score: None,
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn ResponseValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_max_prompt_chars(mut self, max_chars: usize) -> Self {
        self.max_prompt_chars = max_chars;
        self
    }

    /// Reject pages the model scores below `min_score` as not job postings.
    pub fn with_min_score(mut self, min_score: Option<f64>) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn request_for(&self, link: &ScrapedLink) -> CompletionRequest {
        CompletionRequest {
            system: SYSTEM_PROMPT.to_string(),
            prompt: build_prompt(&link.url, &link.scraped_text, self.max_prompt_chars),
            schema_name: SCHEMA_NAME.to_string(),
            schema: response_schema::<AiJobExtraction>(),
        }
    }
}

#[async_trait]
impl MetadataExtractor for AiExtractor {
    async fn extract(&self, link: &ScrapedLink) -> Result<ExtractedLinkMetadata, ExtractionError> {
        let request = self.request_for(link);
        let raw = self.client.complete_json(&request).await?;
        let extraction = self.validator.validate(&raw)?;

        tracing::info!(
            link_id = %link.original_request.id,
            url = %link.url,
            ai_score = extraction.ai_score,
            ai_note = extraction.ai_note.as_deref().unwrap_or(""),
            "AI extraction complete"
        );

        if let Some(min) = self.min_score {
            if extraction.ai_score < min {
                return Err(ExtractionError::NotAJobPosting {
                    score: extraction.ai_score,
                    note: extraction.ai_note.unwrap_or_default(),
                });
            }
        }

        let (metadata, flags) = to_metadata(extraction);
        for flag in &flags {
            tracing::warn!(url = %link.url, flag = %flag, "Dropped extracted field");
        }
        Ok(metadata)
    }
}

/// Prompt with field-by-field instructions and the (truncated) page text.
pub fn build_prompt(url: &str, scraped_text: &str, max_chars: usize) -> String {
    let text = truncate_chars(scraped_text, max_chars);
    format!(
        "Extract job posting metadata from the page below.\n\
         \n\
         Fields:\n\
         - jobTitle: the exact title of the role.\n\
         - companyName: the hiring company (not the job board).\n\
         - location: one of {locations}.\n\
         - jobFunction: one of {functions}.\n\
         - jobType: one of {types}.\n\
         - datePosted: the posting date as YYYY-MM-DD, only if stated.\n\
         - jobDescription: a plain-text summary of responsibilities and requirements.\n\
         - aiScore: 0-100, how confident you are this page is a single, open job posting.\n\
         - aiNote: one sentence explaining aiScore.\n\
         \n\
         Page URL: {url}\n\
         \n\
         Page text:\n\
         \"\"\"\n\
         {text}\n\
         \"\"\"",
        locations = variant_list::<JobLocation>(),
        functions = variant_list::<JobFunction>(),
        types = variant_list::<JobType>(),
    )
}

fn variant_list<T: ClosedSet>() -> String {
    T::iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ")
}

/// Cut `text` to at most `max_chars` characters on a char boundary.
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Map the raw extraction onto closed sets, dropping what does not fit.
/// Returns the metadata and a description of each dropped value.
pub fn to_metadata(extraction: AiJobExtraction) -> (ExtractedLinkMetadata, Vec<String>) {
    let mut flags = Vec::new();

    let location = closed_field::<JobLocation>("location", extraction.location, &mut flags);
    let job_function =
        closed_field::<JobFunction>("jobFunction", extraction.job_function, &mut flags);
    let job_type = closed_field::<JobType>("jobType", extraction.job_type, &mut flags);

    let date_posted = extraction.date_posted.and_then(|raw| {
        match NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
            Ok(date) => Some(date),
            Err(_) => {
                flags.push(format!("datePosted '{raw}' is not YYYY-MM-DD"));
                None
            }
        }
    });

    let metadata = ExtractedLinkMetadata {
        job_title: extraction.job_title,
        company_name: extraction.company_name,
        location,
        job_function,
        job_type,
        date_posted,
        job_description: extraction.job_description,
    };
    (metadata, flags)
}

fn closed_field<T: ClosedSet>(
    name: &str,
    raw: Option<String>,
    flags: &mut Vec<String>,
) -> Option<T> {
    let raw = raw?;
    let matched = T::match_loose(&raw);
    if matched.is_none() {
        flags.push(format!("{name} '{raw}' is not one of: {}", variant_list::<T>()));
    }
    matched
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error(transparent)]
    Ai(#[from] AiError),

    #[error("AI output is not valid JSON for the schema: {0}")]
    Malformed(serde_json::Error),

    #[error("AI output failed schema validation: {0}")]
    Schema(String),

    #[error("Page does not look like a job posting (score {score}): {note}")]
    NotAJobPosting { score: f64, note: String },

    #[error("Extraction timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl Classify for ExtractionError {
    fn class(&self) -> ErrorClass {
        match self {
            ExtractionError::Ai(e) => e.class(),
            ExtractionError::NotAJobPosting { .. } => ErrorClass::Terminal,
            // Model output varies between calls; another try may conform.
            ExtractionError::Malformed(_)
            | ExtractionError::Schema(_)
            | ExtractionError::Timeout(_) => ErrorClass::Transient,
        }
    }
}

impl From<AttemptTimeout> for ExtractionError {
    fn from(timeout: AttemptTimeout) -> Self {
        ExtractionError::Timeout(timeout.0)
    }
}
