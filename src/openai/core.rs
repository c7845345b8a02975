use std::{fmt, time::Duration};

use futures::stream::BoxStream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{AppConfig, DEFAULT_API_BASE, DEFAULT_MAX_TOKENS, DEFAULT_MODEL, DEFAULT_TEMPERATURE};
use crate::openai::error::{CompletionError, classify, error_body_message, error_payload_message};

/// Limit for connecting and for each read. A reply that keeps
/// streaming is never cut off, a server that goes quiet is.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// How much of an unparsable body to keep in error messages.
const BODY_EXCERPT_LEN: usize = 500;

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub enum Role {
    #[serde(rename = "system")]
    System,
    #[serde(rename = "assistant")]
    Assistant,
    #[serde(rename = "user")]
    User,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: &str) -> Self {
        Message {
            role,
            content: content.to_string(),
        }
    }
}

/// Body of `POST /chat/completions`. Built fresh for every call.
#[derive(Serialize, Debug)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub stream: bool,
}

/// The normalized outcome of a buffered completion: the first
/// choice's content and why the model stopped, when the provider
/// said so.
#[derive(Clone, Debug, PartialEq)]
pub struct CompletionResult {
    pub content: String,
    pub finish_reason: Option<String>,
}

// Only the fields needed to pull content out of a streamed chunk.
// Everything is optional because heartbeat and usage chunks omit
// most of them.
#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<CompletionChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChunkChoice {
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// Something meaningful decoded from the event stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SseEvent {
    Fragment(String),
    Done,
}

/// Returns the payload of a `data:` line, if there is one.
fn event_data(line: &str) -> Option<&str> {
    let data = line.trim().strip_prefix("data:")?.trim();
    if data.is_empty() { None } else { Some(data) }
}

/// Decode a single line of a streamed response. Blank lines,
/// comments, malformed JSON and chunks without any content are not
/// errors, they are skipped.
pub fn decode_line(line: &str) -> Option<SseEvent> {
    let data = event_data(line)?;

    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }

    match serde_json::from_str::<CompletionChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta)
            .and_then(|delta| delta.content)
            .filter(|content| !content.is_empty())
            .map(SseEvent::Fragment),
        Err(e) => {
            tracing::trace!("Skipping unparsable chunk {}: {}", data, e);
            None
        }
    }
}

/// Incremental decoder for the `text/event-stream` body of a
/// streaming completion.
///
/// Network reads don't line up with lines (or even with UTF-8
/// character boundaries) so bytes are buffered until a full line is
/// available. Once `[DONE]` is seen nothing else is ever emitted.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }

        self.buffer.extend_from_slice(bytes);

        while let Some(end) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            if let Some(event) = decode_line(&String::from_utf8_lossy(&line)) {
                let is_done = event == SseEvent::Done;
                events.push(event);
                if is_done {
                    self.done = true;
                    self.buffer.clear();
                    break;
                }
            }
        }

        events
    }

    /// Flush whatever is left once the connection closes. The last
    /// line of a body doesn't have to end with a newline.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if self.done {
            return None;
        }
        self.done = true;
        let rest = std::mem::take(&mut self.buffer);
        decode_line(&String::from_utf8_lossy(&rest))
    }

    pub fn is_done(&self) -> bool {
        self.done
    }
}

/// Rebuild the content of a reply from a body that was sent in the
/// streaming wire format even though a buffered response was asked
/// for. Returns `None` if no content could be recovered at all.
pub fn reassemble_event_stream(body: &str) -> Option<String> {
    let parts: Vec<String> = body
        .lines()
        .filter_map(event_data)
        .filter_map(|data| serde_json::from_str::<Value>(data).ok())
        .filter_map(|chunk| {
            let choice = chunk.get("choices")?.as_array()?.first()?.clone();
            choice["delta"]["content"]
                .as_str()
                .or_else(|| choice["message"]["content"].as_str())
                .map(String::from)
        })
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.concat())
    }
}

fn excerpt(body: &str) -> String {
    body.chars().take(BODY_EXCERPT_LEN).collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Normalize the body of a buffered completion into a
/// `CompletionResult`.
///
/// A well-formed JSON object is read directly. A body that isn't
/// JSON at all is given a second chance as a sequence of `data:`
/// lines, since some OpenAI compatible providers stream regardless
/// of what was requested.
pub fn parse_completion_body(body: &str, model: &str) -> Result<CompletionResult, CompletionError> {
    let value = match serde_json::from_str::<Value>(body) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!("Response is not JSON ({}), trying the event stream format", e);
            return reassemble_event_stream(body)
                .map(|content| CompletionResult {
                    content,
                    finish_reason: Some(String::from("stop")),
                })
                .ok_or_else(|| CompletionError::MalformedResponse(excerpt(body)));
        }
    };

    let obj = match value {
        Value::Object(obj) => obj,
        other => {
            return Err(CompletionError::MalformedResponse(format!(
                "expected a JSON object but got {}",
                json_kind(&other)
            )));
        }
    };

    let choice = obj
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first());

    let Some(choice) = choice else {
        if let Some(error) = obj.get("error").filter(|e| !e.is_null()) {
            return Err(classify(None, &error_payload_message(error), model));
        }
        return Err(CompletionError::EmptyResponse(excerpt(body)));
    };

    let content = choice["message"]["content"].as_str().ok_or_else(|| {
        CompletionError::MalformedResponse(format!("choice is missing message content: {}", choice))
    })?;

    Ok(CompletionResult {
        content: content.to_string(),
        finish_reason: choice["finish_reason"].as_str().map(String::from),
    })
}

/// Text appended to a stream when the call fails part way (or before
/// it starts) so the reader is left with a finished message rather
/// than a broken one.
pub fn error_fragment(err: &CompletionError) -> String {
    format!("\n\nError: {}", err)
}

/// Client for an OpenAI compatible chat completion API.
///
fn http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .connect_timeout(timeout)
        .read_timeout(timeout)
        .build()
}

/// Holds the credentials for the duration of a session. Cloning is
/// cheap and shares the underlying connection pool.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Client")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl Client {
    /// Fails with `MissingApiKey` for an empty key, no request is
    /// ever attempted without one.
    pub fn new(api_key: &str, base_url: Option<&str>) -> Result<Self, CompletionError> {
        if api_key.trim().is_empty() {
            return Err(CompletionError::MissingApiKey);
        }

        let http = http_client(REQUEST_TIMEOUT)?;

        Ok(Self {
            http,
            api_key: api_key.to_string(),
            base_url: base_url
                .unwrap_or(DEFAULT_API_BASE)
                .trim_end_matches('/')
                .to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, CompletionError> {
        Ok(Self::new(&config.api_key, Some(&config.api_base))?
            .with_model(&config.model)
            .with_max_tokens(config.max_tokens)
            .with_temperature(config.temperature))
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn request(&self, messages: Vec<Message>, stream: bool) -> CompletionRequest {
        CompletionRequest {
            model: self.model.clone(),
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream,
        }
    }

    async fn send(&self, request: &CompletionRequest) -> Result<reqwest::Response, CompletionError> {
        let url = format!("{}/chat/completions", self.base_url);
        tracing::debug!(
            "Requesting completion from {} (model: {}, messages: {}, stream: {})",
            url,
            request.model,
            request.messages.len(),
            request.stream
        );

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .inspect_err(|e| tracing::error!("Completion request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = if body.trim().is_empty() {
                status.canonical_reason().unwrap_or("Unknown error").to_string()
            } else {
                error_body_message(&body)
            };
            let err = classify(Some(status.as_u16()), &message, &request.model);
            tracing::warn!("Completion request returned {}: {}", status, err);
            return Err(err);
        }

        Ok(response)
    }

    /// Buffered completion: waits for the full response and
    /// normalizes it.
    pub async fn complete(&self, messages: Vec<Message>) -> Result<CompletionResult, CompletionError> {
        let request = self.request(messages, false);
        let response = self.send(&request).await?;
        let body = response
            .text()
            .await
            .inspect_err(|e| tracing::error!("Reading completion body failed: {}", e))?;

        parse_completion_body(&body, &request.model)
            .inspect_err(|e| tracing::warn!("Completion response rejected: {}", e))
    }

    /// Streaming completion: a lazy stream of text fragments in the
    /// order they arrive.
    ///
    /// The stream never fails. Anything that goes wrong becomes one
    /// last explanatory fragment and the stream ends. Fragments that
    /// were already yielded stay valid.
    pub fn complete_stream(&self, messages: Vec<Message>) -> BoxStream<'static, String> {
        let client = self.clone();
        let request = self.request(messages, true);

        Box::pin(async_stream::stream! {
            let response = match client.send(&request).await {
                Ok(response) => response,
                Err(e) => {
                    yield error_fragment(&e);
                    return;
                }
            };

            let mut body = response.bytes_stream();
            let mut decoder = SseDecoder::new();

            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        tracing::error!("Completion stream interrupted: {}", e);
                        yield error_fragment(&CompletionError::Transport(e));
                        return;
                    }
                };

                for event in decoder.push(&chunk) {
                    if let SseEvent::Fragment(fragment) = event {
                        yield fragment;
                    }
                }

                if decoder.is_done() {
                    tracing::debug!("Completion stream finished");
                    return;
                }
            }

            // Connection closed without a `[DONE]`
            if let Some(SseEvent::Fragment(fragment)) = decoder.finish() {
                yield fragment;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client(url: &str) -> Client {
        Client::new("test-key", Some(url)).unwrap().with_model("gpt-4")
    }

    fn messages() -> Vec<Message> {
        vec![
            Message::new(Role::System, "You are a helpful assistant."),
            Message::new(Role::User, "hello"),
        ]
    }

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_string(&Role::System).unwrap(), r#""system""#);
        assert_eq!(
            serde_json::to_string(&Role::Assistant).unwrap(),
            r#""assistant""#
        );
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), r#""user""#);
    }

    #[test]
    fn test_message_new() {
        let msg = Message::new(Role::User, "Hello world");
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"role":"user","content":"Hello world"}"#
        );
    }

    #[test]
    fn test_request_serialization() {
        let client = test_client("https://api.example.com/v1")
            .with_max_tokens(100)
            .with_temperature(0.5);
        let request = client.request(messages(), true);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["model"], "gpt-4");
        assert_eq!(json["max_tokens"], 100);
        assert_eq!(json["temperature"], 0.5);
        assert_eq!(json["stream"], true);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hello");
    }

    #[test]
    fn test_client_rejects_empty_key() {
        assert!(matches!(
            Client::new("", None),
            Err(CompletionError::MissingApiKey)
        ));
        assert!(matches!(
            Client::new("   ", None),
            Err(CompletionError::MissingApiKey)
        ));
    }

    #[test]
    fn test_client_defaults() {
        let client = Client::new("test-key", None).unwrap();
        assert_eq!(client.base_url(), DEFAULT_API_BASE);
        assert_eq!(client.model(), DEFAULT_MODEL);

        let client = Client::new("test-key", Some("http://localhost:8080/v1/")).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080/v1");
    }

    #[test]
    fn test_client_debug_redacts_key() {
        let client = Client::new("sk-super-secret", None).unwrap();
        let debug = format!("{:?}", client);
        assert!(!debug.contains("sk-super-secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_decode_line() {
        assert_eq!(
            decode_line(r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#),
            Some(SseEvent::Fragment("Hel".to_string()))
        );
        assert_eq!(decode_line("data: [DONE]"), Some(SseEvent::Done));
        assert_eq!(decode_line("data: [DONE]\r\n"), Some(SseEvent::Done));
        // Heartbeats, role-only deltas and garbage are skipped
        assert_eq!(decode_line(""), None);
        assert_eq!(decode_line(": keep-alive"), None);
        assert_eq!(decode_line("data: "), None);
        assert_eq!(decode_line("data: {not json"), None);
        assert_eq!(
            decode_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            None
        );
        assert_eq!(
            decode_line(r#"data: {"choices":[{"delta":{"content":""}}]}"#),
            None
        );
        assert_eq!(decode_line(r#"data: {"choices":[]}"#), None);
        assert_eq!(
            decode_line(r#"data: {"choices":[{"delta":{"content":null},"finish_reason":"stop"}]}"#),
            None
        );
    }

    #[test]
    fn test_decoder_handles_split_lines() {
        let mut decoder = SseDecoder::new();
        let mut events = decoder.push(b"data: {\"choices\":[{\"delta\":{\"con");
        assert!(events.is_empty());

        events.extend(decoder.push(b"tent\":\"Hi\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"!\"}}]}\n"));
        assert_eq!(
            events,
            vec![
                SseEvent::Fragment("Hi".to_string()),
                SseEvent::Fragment("!".to_string()),
            ]
        );
    }

    #[test]
    fn test_decoder_handles_split_utf8() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"héllo 🐉\"}}]}\n";
        let bytes = line.as_bytes();
        // Split inside the multi-byte dragon emoji
        let split = line.find('🐉').unwrap() + 2;

        let mut decoder = SseDecoder::new();
        let mut events = decoder.push(&bytes[..split]);
        events.extend(decoder.push(&bytes[split..]));

        assert_eq!(events, vec![SseEvent::Fragment("héllo 🐉".to_string())]);
    }

    #[test]
    fn test_decoder_stops_at_done() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\ndata: [DONE]\ndata: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n",
        );
        assert_eq!(
            events,
            vec![SseEvent::Fragment("a".to_string()), SseEvent::Done]
        );
        assert!(decoder.is_done());
        assert!(decoder.push(b"data: {\"choices\":[{\"delta\":{\"content\":\"c\"}}]}\n").is_empty());
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_decoder_finish_flushes_last_line() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"choices\":[{\"delta\":{\"content\":\"end\"}}]}").is_empty());
        assert_eq!(decoder.finish(), Some(SseEvent::Fragment("end".to_string())));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_parse_well_formed_body() {
        let body = r#"{"choices":[{"message":{"content":"Hi!"}}]}"#;
        let result = parse_completion_body(body, "gpt-4").unwrap();
        assert_eq!(result.content, "Hi!");
        assert_eq!(result.finish_reason, None);

        let body = r#"{
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Once upon a time"},
                "finish_reason": "length"
            }]
        }"#;
        let result = parse_completion_body(body, "gpt-4").unwrap();
        assert_eq!(result.content, "Once upon a time");
        assert_eq!(result.finish_reason.as_deref(), Some("length"));
    }

    #[test]
    fn test_parse_event_stream_body() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\ndata: {\"choices\":[{\"delta\":{\"content\":\"!\"}}]}";
        let result = parse_completion_body(body, "gpt-4").unwrap();
        assert_eq!(result.content, "Hi!");
        assert_eq!(result.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_event_stream_body_matches_well_formed_body() {
        let well_formed = r#"{"choices":[{"message":{"content":"Hello there, friend!"}}]}"#;
        let streamed = "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n\
                        data: {\"choices\":[{\"delta\":{\"content\":\"Hello \"}}]}\n\n\
                        data: {\"choices\":[{\"delta\":{\"content\":\"there, \"}}]}\n\n\
                        data: {\"choices\":[{\"delta\":{\"content\":\"friend!\"}}]}\n\n\
                        data: [DONE]\n\n";

        assert_eq!(
            parse_completion_body(well_formed, "gpt-4").unwrap().content,
            parse_completion_body(streamed, "gpt-4").unwrap().content
        );
    }

    #[test]
    fn test_parse_event_stream_body_with_message_lines() {
        let body = "data: {\"choices\":[{\"message\":{\"content\":\"Whole reply\"}}]}\ndata: [DONE]";
        assert_eq!(parse_completion_body(body, "gpt-4").unwrap().content, "Whole reply");
    }

    #[test]
    fn test_parse_unrecoverable_body() {
        let err = parse_completion_body("<html>Bad Gateway</html>", "gpt-4").unwrap_err();
        assert!(matches!(err, CompletionError::MalformedResponse(_)));

        let err = parse_completion_body("data: [DONE]", "gpt-4").unwrap_err();
        assert!(matches!(err, CompletionError::MalformedResponse(_)));
    }

    #[test]
    fn test_parse_non_object_body() {
        let err = parse_completion_body(r#"["Hi!"]"#, "gpt-4").unwrap_err();
        match err {
            CompletionError::MalformedResponse(msg) => assert!(msg.contains("an array")),
            other => panic!("Expected MalformedResponse, got {:?}", other),
        }

        let err = parse_completion_body(r#""Hi!""#, "gpt-4").unwrap_err();
        assert!(matches!(err, CompletionError::MalformedResponse(_)));
    }

    #[test]
    fn test_parse_empty_body() {
        assert!(matches!(
            parse_completion_body("{}", "gpt-4"),
            Err(CompletionError::EmptyResponse(_))
        ));
        assert!(matches!(
            parse_completion_body(r#"{"choices":[]}"#, "gpt-4"),
            Err(CompletionError::EmptyResponse(_))
        ));
        assert!(matches!(
            parse_completion_body(r#"{"choices":[],"error":null}"#, "gpt-4"),
            Err(CompletionError::EmptyResponse(_))
        ));
    }

    #[test]
    fn test_parse_error_payload() {
        let body = r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#;
        assert!(matches!(
            parse_completion_body(body, "gpt-4"),
            Err(CompletionError::Auth(_))
        ));

        let body = r#"{"error":"something broke"}"#;
        match parse_completion_body(body, "gpt-4") {
            Err(CompletionError::Provider { status, message }) => {
                assert_eq!(status, None);
                assert_eq!(message, "something broke");
            }
            other => panic!("Expected Provider, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_choice_without_content() {
        let body = r#"{"choices":[{"message":{"role":"assistant"}}]}"#;
        assert!(matches!(
            parse_completion_body(body, "gpt-4"),
            Err(CompletionError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_complete_basic() {
        let mut server = mockito::Server::new_async().await;

        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "model": "gpt-4",
                "stream": false,
                "messages": [
                    {"role": "system", "content": "You are a helpful assistant."},
                    {"role": "user", "content": "hello"}
                ]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"content":"Hi!"},"finish_reason":"stop"}]}"#)
            .create_async()
            .await;

        let result = test_client(&server.url()).complete(messages()).await;

        mock.assert_async().await;
        let result = result.unwrap();
        assert_eq!(result.content, "Hi!");
        assert_eq!(result.finish_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn test_complete_event_stream_body() {
        let mut server = mockito::Server::new_async().await;

        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "text/plain")
            .with_body("data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\ndata: {\"choices\":[{\"delta\":{\"content\":\"!\"}}]}")
            .create_async()
            .await;

        let result = test_client(&server.url()).complete(messages()).await;
        assert_eq!(result.unwrap().content, "Hi!");
    }

    async fn complete_with_status(status: usize, body: &str) -> Result<CompletionResult, CompletionError> {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(status)
            .with_body(body)
            .create_async()
            .await;

        test_client(&server.url()).complete(messages()).await
    }

    #[tokio::test]
    async fn test_complete_classifies_status() {
        assert!(matches!(
            complete_with_status(401, r#"{"error":{"message":"Incorrect API key provided"}}"#).await,
            Err(CompletionError::Auth(_))
        ));

        assert!(matches!(
            complete_with_status(429, r#"{"error":{"message":"Rate limit reached"}}"#).await,
            Err(CompletionError::RateLimit(_))
        ));

        match complete_with_status(404, r#"{"error":{"message":"The model `gpt-4` does not exist"}}"#).await {
            Err(CompletionError::ModelNotFound { model, message }) => {
                assert_eq!(model, "gpt-4");
                assert!(message.contains("does not exist"));
            }
            other => panic!("Expected ModelNotFound, got {:?}", other),
        }

        match complete_with_status(500, "").await {
            Err(CompletionError::Provider { status, message }) => {
                assert_eq!(status, Some(500));
                assert_eq!(message, "Internal Server Error");
            }
            other => panic!("Expected Provider, got {:?}", other),
        }

        match complete_with_status(502, "upstream exploded").await {
            Err(CompletionError::Provider { status, message }) => {
                assert_eq!(status, Some(502));
                assert_eq!(message, "upstream exploded");
            }
            other => panic!("Expected Provider, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_complete_transport_error() {
        // Nothing is listening on port 9 of localhost
        let client = test_client("http://127.0.0.1:9");
        assert!(matches!(
            client.complete(messages()).await,
            Err(CompletionError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_complete_stream_content() {
        let mut server = mockito::Server::new_async().await;

        let sse_response = r#"data: {"id":"chunk0","choices":[{"index":0,"delta":{"role":"assistant"},"finish_reason":null}]}

data: {"id":"chunk1","choices":[{"index":0,"delta":{"content":"Hel"},"finish_reason":null}]}

: keep-alive

data: {"id":"chunk2","choices":[{"index":0,"delta":{"content":"lo"},"finish_reason":null}]}

data: {"id":"chunk3","choices":[{"index":0,"delta":{"content":"!"},"finish_reason":"stop"}]}

data: [DONE]

data: {"id":"chunk4","choices":[{"index":0,"delta":{"content":"ignored"},"finish_reason":null}]}

"#;

        let mock = server
            .mock("POST", "/chat/completions")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({"stream": true})))
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(sse_response)
            .create_async()
            .await;

        let fragments: Vec<String> = test_client(&server.url())
            .complete_stream(messages())
            .collect()
            .await;

        mock.assert_async().await;
        assert_eq!(fragments, vec!["Hel", "lo", "!"]);
    }

    #[tokio::test]
    async fn test_complete_stream_without_done() {
        let mut server = mockito::Server::new_async().await;

        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body("data: {\"choices\":[{\"delta\":{\"content\":\"Bye\"}}]}\ndata: {\"choices\":[{\"delta\":{\"content\":\"!\"}}]}")
            .create_async()
            .await;

        let fragments: Vec<String> = test_client(&server.url())
            .complete_stream(messages())
            .collect()
            .await;

        assert_eq!(fragments.concat(), "Bye!");
    }

    #[tokio::test]
    async fn test_complete_stream_error_becomes_fragment() {
        let mut server = mockito::Server::new_async().await;

        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body(r#"{"error":{"message":"Rate limit reached"}}"#)
            .create_async()
            .await;

        let fragments: Vec<String> = test_client(&server.url())
            .complete_stream(messages())
            .collect()
            .await;

        assert_eq!(fragments.len(), 1);
        assert!(fragments[0].starts_with("\n\nError: "));
        assert!(fragments[0].contains("Too many requests"));
        assert!(fragments[0].contains("Rate limit reached"));
    }

    #[tokio::test]
    async fn test_complete_stream_transport_error_becomes_fragment() {
        let fragments: Vec<String> = test_client("http://127.0.0.1:9")
            .complete_stream(messages())
            .collect()
            .await;

        assert_eq!(fragments.len(), 1);
        assert!(fragments[0].contains("Request failed"));
    }

    fn sse_chunk(data: &str) -> Vec<u8> {
        format!("{:x}\r\n{}\r\n", data.len(), data).into_bytes()
    }

    fn sse_fragment(content: &str) -> Vec<u8> {
        sse_chunk(&format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"delta": {"content": content}}]})
        ))
    }

    /// Serves one chunked `text/event-stream` response over a plain
    /// socket. Each write goes out after its delay, then the
    /// connection is closed.
    async fn raw_sse_server(writes: Vec<(u64, Vec<u8>)>) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();

            // Read the whole request before answering
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                request.extend_from_slice(&buf[..n]);
                if let Some(end) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                    let head = String::from_utf8_lossy(&request[..end]).to_lowercase();
                    let content_length = head
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if request.len() >= end + 4 + content_length {
                        break;
                    }
                }
            }

            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n",
                )
                .await
                .unwrap();
            for (delay, bytes) in writes {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                socket.write_all(&bytes).await.unwrap();
                socket.flush().await.unwrap();
            }
            let _ = socket.shutdown().await;
        });

        url
    }

    #[tokio::test]
    async fn test_complete_stream_outlives_the_read_timeout() {
        let mut writes: Vec<(u64, Vec<u8>)> = ["w0 ", "w1 ", "w2 ", "w3 "]
            .into_iter()
            .map(|word| (150, sse_fragment(word)))
            .collect();
        writes.push((150, sse_chunk("data: [DONE]\n\n")));
        writes.push((0, b"0\r\n\r\n".to_vec()));
        let url = raw_sse_server(writes).await;

        // The whole reply takes longer than the timeout, no single
        // read does
        let mut client = test_client(&url);
        client.http = http_client(Duration::from_millis(400)).unwrap();

        let fragments: Vec<String> = client.complete_stream(messages()).collect().await;

        assert_eq!(fragments, vec!["w0 ", "w1 ", "w2 ", "w3 "]);
    }

    #[tokio::test]
    async fn test_complete_stream_keeps_fragments_before_a_broken_body() {
        let url = raw_sse_server(vec![
            (0, sse_fragment("w0 ")),
            (50, sse_fragment("w1 ")),
            // Not a valid chunk size
            (50, b"zz\r\n".to_vec()),
        ])
        .await;

        let fragments: Vec<String> = test_client(&url).complete_stream(messages()).collect().await;

        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[..2], ["w0 ", "w1 "]);
        assert!(fragments[2].starts_with("\n\nError: Request failed"));
    }
}
