use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::services::retry::{Classify, ErrorClass};

/// Connection settings for an OpenAI-compatible completion API.
#[derive(Debug, Clone)]
pub struct AiClientConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

/// A prompt plus the JSON schema the answer must follow.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub schema_name: String,
    pub schema: Value,
}

/// Structured-output completion call. Returns the raw JSON text.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete_json(&self, request: &CompletionRequest) -> Result<String, AiError>;
}

/// Client for `/chat/completions` with `response_format: json_schema`.
pub struct OpenAiClient {
    http: Client,
    config: AiClientConfig,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: ResponseFormat<'a>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    format_type: &'static str,
    json_schema: JsonSchemaFormat<'a>,
}

#[derive(Serialize)]
struct JsonSchemaFormat<'a> {
    name: &'a str,
    strict: bool,
    schema: &'a Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

impl OpenAiClient {
    pub fn new(config: AiClientConfig) -> Result<Self, AiError> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete_json(&self, request: &CompletionRequest) -> Result<String, AiError> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );

        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            temperature: 0.0,
            response_format: ResponseFormat {
                format_type: "json_schema",
                json_schema: JsonSchemaFormat {
                    name: &request.schema_name,
                    strict: true,
                    schema: &request.schema,
                },
            },
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let message = response.text().await.unwrap_or_default();
            return Err(status_error(status, message, retry_after));
        }

        let text = response.text().await?;
        parse_completion(&text)
    }
}

/// Pull the assistant message out of a chat completion body.
pub fn parse_completion(body: &str) -> Result<String, AiError> {
    let response: ChatResponse = serde_json::from_str(body)?;
    let message = response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message)
        .ok_or(AiError::EmptyResponse)?;

    if let Some(refusal) = message.refusal.filter(|r| !r.is_empty()) {
        return Err(AiError::Refused(refusal));
    }

    message
        .content
        .filter(|c| !c.trim().is_empty())
        .ok_or(AiError::EmptyResponse)
}

/// Map a non-success HTTP status onto an error with the right retry class.
pub fn status_error(status: StatusCode, message: String, retry_after: Option<u64>) -> AiError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return AiError::RateLimited {
            retry_after_secs: retry_after,
        };
    }
    AiError::Api {
        status: status.as_u16(),
        message,
    }
}

/// JSON schema for `T` in the shape strict structured output requires:
/// every object closed (`additionalProperties: false`) and every property
/// listed as required (optional ones stay nullable).
pub fn response_schema<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(schema).unwrap_or_default();
    close_objects(&mut value);
    if let Value::Object(map) = &mut value {
        map.remove("$schema");
        map.remove("title");
        map.remove("definitions");
    }
    value
}

fn close_objects(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if map.get("type") == Some(&Value::String("object".to_string())) {
                map.insert("additionalProperties".to_string(), Value::Bool(false));
                if let Some(Value::Object(props)) = map.get("properties") {
                    let keys = props.keys().cloned().map(Value::String).collect();
                    map.insert("required".to_string(), Value::Array(keys));
                }
            }
            // Numeric formats like "double" are not accepted in strict mode.
            if matches!(map.get("format"), Some(Value::String(_))) {
                map.remove("format");
            }
            for (_, child) in map.iter_mut() {
                close_objects(child);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(close_objects),
        _ => {}
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("AI request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("AI provider rate limited the request (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("AI provider returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("AI response had no content")]
    EmptyResponse,

    #[error("AI model refused: {0}")]
    Refused(String),

    #[error("Failed to decode AI response envelope: {0}")]
    Decode(#[from] serde_json::Error),
}

impl Classify for AiError {
    fn class(&self) -> ErrorClass {
        match self {
            AiError::RateLimited { .. } => ErrorClass::RateLimited,
            // Bad request, auth and permission problems will not fix themselves.
            AiError::Api { status, .. }
                if (400..500).contains(status) && *status != 408 =>
            {
                ErrorClass::Terminal
            }
            _ => ErrorClass::Transient,
        }
    }
}
