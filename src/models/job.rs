use chrono::NaiveDate;
use garde::Validate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strsim::jaro_winkler;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// Similarity needed before a loose AI value is mapped onto a closed-set variant.
const CLOSED_SET_MATCH_THRESHOLD: f64 = 0.85;

/// Where the work happens.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, EnumIter, Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "title_case")]
pub enum JobLocation {
    Remote,
    Hybrid,
    OnSite,
}

/// Broad discipline of the role.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, EnumIter, Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "title_case")]
pub enum JobFunction {
    SoftwareEngineering,
    DataScience,
    MachineLearning,
    ProductManagement,
    Design,
    DevOps,
    Security,
    QualityAssurance,
    Hardware,
}

/// Employment arrangement.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, EnumIter, Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "title_case")]
pub enum JobType {
    FullTime,
    PartTime,
    Internship,
    Contract,
    NewGrad,
}

/// A closed vocabulary the AI output must be mapped onto.
pub trait ClosedSet: Sized + Copy + IntoEnumIterator + std::fmt::Display {
    /// Extra spellings accepted for a variant besides its display name.
    fn aliases(&self) -> &'static [&'static str] {
        &[]
    }

    /// Map a free-form value onto a variant: exact (ignoring case and
    /// punctuation), then alias, then Jaro-Winkler above the threshold.
    fn match_loose(raw: &str) -> Option<Self> {
        let wanted = fold(raw);
        if wanted.is_empty() {
            return None;
        }

        for variant in Self::iter() {
            if fold(&variant.to_string()) == wanted
                || variant.aliases().iter().any(|alias| fold(alias) == wanted)
            {
                return Some(variant);
            }
        }

        let mut best: Option<(Self, f64)> = None;
        for variant in Self::iter() {
            let score = jaro_winkler(&fold(&variant.to_string()), &wanted);
            if score >= CLOSED_SET_MATCH_THRESHOLD && best.map_or(true, |(_, s)| score > s) {
                best = Some((variant, score));
            }
        }
        best.map(|(variant, _)| variant)
    }
}

impl ClosedSet for JobLocation {
    fn aliases(&self) -> &'static [&'static str] {
        match self {
            JobLocation::Remote => &["fully remote", "work from home", "wfh", "anywhere"],
            JobLocation::Hybrid => &["hybrid remote", "partially remote"],
            JobLocation::OnSite => &["onsite", "in office", "in person", "office"],
        }
    }
}

impl ClosedSet for JobFunction {
    fn aliases(&self) -> &'static [&'static str] {
        match self {
            JobFunction::SoftwareEngineering => &["software", "software development", "swe", "engineering"],
            JobFunction::DataScience => &["data", "data analytics", "data engineering"],
            JobFunction::MachineLearning => &["ml", "ai", "artificial intelligence"],
            JobFunction::ProductManagement => &["product", "pm", "product manager"],
            JobFunction::Design => &["ux", "ui", "product design", "ux design"],
            JobFunction::DevOps => &["sre", "site reliability", "infrastructure", "platform"],
            JobFunction::Security => &["cybersecurity", "infosec", "information security"],
            JobFunction::QualityAssurance => &["qa", "test", "testing"],
            JobFunction::Hardware => &["hardware engineering", "electrical engineering", "embedded"],
        }
    }
}

impl ClosedSet for JobType {
    fn aliases(&self) -> &'static [&'static str] {
        match self {
            JobType::FullTime => &["full time", "permanent", "fte"],
            JobType::PartTime => &["part time"],
            JobType::Internship => &["intern", "co op", "coop", "co-op"],
            JobType::Contract => &["contractor", "freelance", "temporary", "temp"],
            JobType::NewGrad => &["new graduate", "graduate", "entry level", "university grad"],
        }
    }
}

/// Lower-cases and keeps only alphanumerics so "Full-time" == "FULL_TIME".
fn fold(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Job metadata extracted from a posting. Every field is optional because
/// the model may not find it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtractedLinkMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<JobLocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_function: Option<JobFunction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_type: Option<JobType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_posted: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_description: Option<String>,
}

/// Raw structured output requested from the AI model.
///
/// `ai_score` and `ai_note` only live for the duration of extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AiJobExtraction {
    /// Exact job title as shown on the posting.
    #[garde(length(min = 1, max = 300))]
    pub job_title: Option<String>,

    /// Name of the hiring company.
    #[garde(length(min = 1, max = 200))]
    pub company_name: Option<String>,

    /// One of: Remote, Hybrid, On Site.
    #[garde(length(min = 1, max = 100))]
    pub location: Option<String>,

    /// One of: Software Engineering, Data Science, Machine Learning, Product
    /// Management, Design, Dev Ops, Security, Quality Assurance, Hardware.
    #[garde(length(min = 1, max = 100))]
    pub job_function: Option<String>,

    /// One of: Full Time, Part Time, Internship, Contract, New Grad.
    #[garde(length(min = 1, max = 100))]
    pub job_type: Option<String>,

    /// Posting date formatted as YYYY-MM-DD.
    #[garde(length(min = 1, max = 40))]
    pub date_posted: Option<String>,

    /// Short plain-text summary of the role and its requirements.
    #[garde(length(min = 1, max = 20000))]
    pub job_description: Option<String>,

    /// Confidence from 0 to 100 that the page is a single job posting.
    #[garde(range(min = 0.0, max = 100.0))]
    #[schemars(range(min = 0, max = 100))]
    pub ai_score: f64,

    /// Brief explanation of the score.
    #[garde(skip)]
    pub ai_note: Option<String>,
}

impl AiJobExtraction {
    /// Treats whitespace-only strings as absent and trims the rest.
    pub fn without_blanks(mut self) -> Self {
        for field in [
            &mut self.job_title,
            &mut self.company_name,
            &mut self.location,
            &mut self.job_function,
            &mut self.job_type,
            &mut self.date_posted,
            &mut self.job_description,
            &mut self.ai_note,
        ] {
            *field = field
                .take()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty());
        }
        self
    }
}
