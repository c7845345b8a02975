use serde_json::Value;
use thiserror::Error;

/// Everything that can go wrong while asking the provider for a
/// completion.
#[derive(Error, Debug)]
pub enum CompletionError {
    #[error("API key is not configured")]
    MissingApiKey,

    #[error("API key was rejected: {0}")]
    Auth(String),

    #[error("Too many requests, please wait a moment and try again: {0}")]
    RateLimit(String),

    #[error("Model {model} is not available: {message}")]
    ModelNotFound { model: String, message: String },

    #[error("Provider error{}: {message}", status_suffix(.status))]
    Provider { status: Option<u16>, message: String },

    #[error("Provider returned an empty response: {0}")]
    EmptyResponse(String),

    #[error("Could not parse provider response: {0}")]
    MalformedResponse(String),

    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (status {})", s)).unwrap_or_default()
}

/// Map a provider failure onto the error taxonomy. The status code
/// wins when it is one we recognize, otherwise fall back to keyword
/// hints in the message text since not every OpenAI compatible
/// provider returns structured error codes.
pub fn classify(status: Option<u16>, message: &str, model: &str) -> CompletionError {
    let message = message.trim().to_string();
    match status {
        Some(401) => return CompletionError::Auth(message),
        Some(429) => return CompletionError::RateLimit(message),
        Some(404) => {
            return CompletionError::ModelNotFound {
                model: model.to_string(),
                message,
            };
        }
        _ => {}
    }

    let lower = message.to_lowercase();
    if lower.contains("api") && lower.contains("key") {
        CompletionError::Auth(message)
    } else if lower.contains("rate") {
        CompletionError::RateLimit(message)
    } else if lower.contains("model") {
        CompletionError::ModelNotFound {
            model: model.to_string(),
            message,
        }
    } else {
        CompletionError::Provider { status, message }
    }
}

/// Pull a human readable message out of an `error` payload. Providers
/// send either `{"error": {"message": "..."}}` or `{"error": "..."}`.
pub fn error_payload_message(error: &Value) -> String {
    match error {
        Value::String(s) => s.clone(),
        Value::Object(obj) => obj
            .get("message")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| error.to_string()),
        other => other.to_string(),
    }
}

/// Same as `error_payload_message` but for a raw response body that
/// may or may not be JSON.
pub fn error_body_message(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(obj)) if obj.contains_key("error") => error_payload_message(&obj["error"]),
        _ => body.to_string(),
    }
}
