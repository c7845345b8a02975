use futures::stream::{self, BoxStream};

use crate::openai::{Client, CompletionError, Message, Role};

/// Most recent transcript entries re-sent with a streaming turn,
/// i.e. three rounds of user/assistant.
pub const HISTORY_WINDOW: usize = 6;

/// Shown instead of a reply when there is no client to talk to.
pub const NOT_CONFIGURED_MESSAGE: &str =
    "Please set your API key (OPENAI_API_KEY or --api-key) before we can chat!";

/// The bounded suffix of a transcript that is sent along with the
/// next turn. System messages are dropped, the request always gets a
/// fresh one.
pub fn history_window(history: &[Message]) -> Vec<Message> {
    let start = history.len().saturating_sub(HISTORY_WINDOW);
    history[start..]
        .iter()
        .filter(|m| m.role != Role::System)
        .cloned()
        .collect()
}

/// Builds `[system] + history window + [user]`.
pub fn build_messages(system: &str, prompt: &str, history: Option<&[Message]>) -> Vec<Message> {
    let mut messages = vec![Message::new(Role::System, system)];
    if let Some(history) = history {
        messages.extend(history_window(history));
    }
    messages.push(Message::new(Role::User, prompt));
    messages
}

/// Runs a single buffered turn and returns the reply text.
pub async fn chat(
    client: Option<&Client>,
    prompt: &str,
    system: &str,
) -> Result<String, CompletionError> {
    let client = client.ok_or(CompletionError::MissingApiKey)?;
    let resp = client.complete(build_messages(system, prompt, None)).await?;
    Ok(resp.content)
}

/// Runs a streaming turn. Fragments are meant to be appended to
/// whatever is being displayed as they arrive; failures show up as
/// text in the stream instead of an error.
pub fn chat_stream(
    client: Option<&Client>,
    prompt: &str,
    system: &str,
    history: Option<&[Message]>,
) -> BoxStream<'static, String> {
    let Some(client) = client else {
        tracing::warn!("Streaming chat requested without a configured client");
        return Box::pin(stream::iter([NOT_CONFIGURED_MESSAGE.to_string()]));
    };

    client.complete_stream(build_messages(system, prompt, history))
}
