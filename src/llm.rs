use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::LlmSettings;
use crate::error::AnalysisError;

/// Query the model is told to emit when no table fits the question.
pub const FALLBACK_SQL: &str = "SELECT 'No relevant dataset found' AS message";

pub const SQL_SYSTEM_PROMPT: &str = "You translate questions into SQL for an analytics database. \
You are given the available tables, each with a description and its columns and types. \
Pick exactly one table, the most relevant to the question, and answer with a single SQL query against it. \
Reply with the raw SQL string only: no markdown, no code fences, no explanation, no trailing semicolon. \
Use only the table and column names listed in the schema. \
If no table is relevant to the question, reply exactly with: SELECT 'No relevant dataset found' AS message";

/// Turns a question plus a schema description into SQL text.
#[async_trait]
pub trait SqlGenerator: Send + Sync {
    async fn generate_sql(
        &self,
        question: &str,
        schema_context: &str,
    ) -> Result<String, AnalysisError>;
}

pub fn build_user_prompt(question: &str, schema_context: &str) -> String {
    format!(
        "Available tables:\n\n{}\n\nQuestion: {}",
        schema_context,
        question.trim()
    )
}

/// Removes markdown code fences the model may add despite instructions and
/// trims surrounding whitespace. Text outside a fenced block is discarded.
pub fn extract_sql(raw: &str) -> String {
    let trimmed = raw.trim();

    let Some(open) = trimmed.find("```") else {
        return trimmed.to_string();
    };

    let body = strip_language_tag(&trimmed[open + 3..]);
    let body = match body.find("```") {
        Some(close) => &body[..close],
        None => body,
    };

    body.trim().to_string()
}

fn strip_language_tag(fenced: &str) -> &str {
    match fenced.find('\n') {
        Some(newline) if is_language_tag(&fenced[..newline]) => &fenced[newline + 1..],
        Some(_) => fenced,
        None => match fenced.get(..3) {
            Some(tag)
                if tag.eq_ignore_ascii_case("sql")
                    && fenced[3..].starts_with(char::is_whitespace) =>
            {
                &fenced[3..]
            }
            _ => fenced,
        },
    }
}

fn is_language_tag(line: &str) -> bool {
    let tag = line.trim();
    if tag.eq_ignore_ascii_case("select") || tag.eq_ignore_ascii_case("with") {
        return false;
    }
    tag.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[derive(Debug, Serialize)]
pub struct ChatMessage<'a> {
    pub role: &'a str,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<ChatMessage<'a>>,
    pub temperature: f32,
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponseMessage {
    pub content: Option<String>,
}

impl ChatCompletionResponse {
    pub fn first_content(self) -> Result<String, AnalysisError> {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| AnalysisError::LlmError {
                message: "model returned an empty completion".to_string(),
            })
    }
}

/// OpenAI-compatible `/chat/completions` client.
pub struct ChatCompletionsClient {
    http: reqwest::Client,
    settings: LlmSettings,
}

impl ChatCompletionsClient {
    pub fn new(settings: LlmSettings) -> Result<Self, AnalysisError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()?;

        Ok(Self { http, settings })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        )
    }

    pub fn build_request<'a>(
        &'a self,
        question: &str,
        schema_context: &str,
    ) -> ChatCompletionRequest<'a> {
        ChatCompletionRequest {
            model: &self.settings.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SQL_SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: build_user_prompt(question, schema_context),
                },
            ],
            temperature: 0.0,
        }
    }
}

#[async_trait]
impl SqlGenerator for ChatCompletionsClient {
    async fn generate_sql(
        &self,
        question: &str,
        schema_context: &str,
    ) -> Result<String, AnalysisError> {
        let api_key = self
            .settings
            .api_key
            .as_deref()
            .ok_or_else(|| AnalysisError::ConfigError {
                message: "LLM_API_KEY is not set; natural-language queries are unavailable"
                    .to_string(),
            })?;

        let start_time = std::time::Instant::now();
        info!(
            "Requesting SQL from model '{}' at {}",
            self.settings.model,
            self.endpoint()
        );

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&self.build_request(question, schema_context))
            .send()
            .await
            .map_err(|e| AnalysisError::LlmError {
                message: format!("request to language model failed: {}", e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::LlmError {
                message: format!("language model returned {}: {}", status, body.trim()),
            });
        }

        let completion = response
            .json::<ChatCompletionResponse>()
            .await
            .map_err(|e| AnalysisError::LlmError {
                message: format!("malformed completion response: {}", e),
            })?
            .first_content()?;

        debug!(
            "Model replied in {}ms: {}",
            start_time.elapsed().as_millis(),
            completion
        );
        Ok(completion)
    }
}
