use std::time::Duration;

use serde_json::{Value, json};

use super::{CompletionOracle, CompletionRequest, OracleError, ResponseFormat};
use crate::utils::redaction::{redact_secrets, truncate_chars};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
const ERROR_BODY_MAX_CHARS: usize = 400;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleSettings {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: String::new(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// Client for OpenAI-compatible `chat/completions` endpoints.
pub struct OpenAiOracle {
    agent: ureq::Agent,
    settings: OracleSettings,
}

impl OpenAiOracle {
    #[must_use]
    pub fn new(settings: OracleSettings) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(settings.timeout)
            .build();
        Self { agent, settings }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        )
    }
}

impl CompletionOracle for OpenAiOracle {
    fn complete(&self, request: &CompletionRequest) -> Result<String, OracleError> {
        if self.settings.api_key.trim().is_empty() {
            return Err(OracleError::Unavailable(
                "API key is not configured (set OPENAI_API_KEY or pass --api-key)".to_string(),
            ));
        }

        let body = request_body(&self.settings.model, request);
        tracing::debug!(
            model = %self.settings.model,
            endpoint = %self.endpoint(),
            messages = request.messages.len(),
            "sending completion request"
        );

        let response = self
            .agent
            .post(&self.endpoint())
            .set(
                "Authorization",
                &format!("Bearer {}", self.settings.api_key.trim()),
            )
            .set("Content-Type", "application/json")
            .send_json(body)
            .map_err(|error| match error {
                ureq::Error::Status(code, response) => {
                    let body = response.into_string().unwrap_or_default();
                    OracleError::Unavailable(format!(
                        "status {code}: {}",
                        redact_secrets(&truncate_chars(&body, ERROR_BODY_MAX_CHARS))
                    ))
                }
                ureq::Error::Transport(transport) => {
                    OracleError::Unavailable(redact_secrets(&transport.to_string()))
                }
            })?;

        let payload: Value = response
            .into_json()
            .map_err(|error| OracleError::Malformed(format!("response is not JSON: {error}")))?;
        extract_content(&payload)
    }

    fn model_id(&self) -> &str {
        &self.settings.model
    }
}

#[must_use]
pub fn request_body(model: &str, request: &CompletionRequest) -> Value {
    let mut body = json!({
        "model": model,
        "messages": request.messages,
        "temperature": request.temperature,
    });

    match &request.response_format {
        ResponseFormat::Text => {}
        ResponseFormat::JsonObject => {
            body["response_format"] = json!({ "type": "json_object" });
        }
        ResponseFormat::JsonSchema { name, schema } => {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": { "name": name, "schema": schema, "strict": true },
            });
        }
    }

    body
}

pub fn extract_content(payload: &Value) -> Result<String, OracleError> {
    if let Some(message) = payload.pointer("/error/message").and_then(Value::as_str) {
        return Err(OracleError::Unavailable(redact_secrets(message)));
    }

    payload
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| {
            OracleError::Malformed("completion has no choices[0].message.content".to_string())
        })
}
