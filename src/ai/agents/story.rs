use serde_json::json;

use crate::ai::ActivityError;
use crate::ai::prompt::{self, Prompt};
use crate::openai::Client;
use crate::openai::chat::chat;

pub const DEFAULT_KEYWORDS: &str = "dragon, castle, magic";

/// Story magic: writes a short English story that uses every one of
/// the child's keywords, followed by a small vocabulary table.
pub async fn generate(client: Option<&Client>, keywords: &str) -> Result<String, ActivityError> {
    let keywords = keywords.trim();
    if keywords.is_empty() {
        return Err(ActivityError::EmptyInput("Please enter a few keywords first!"));
    }

    let templates = prompt::templates();
    let system_msg = templates.render(&Prompt::StorySystem.to_string(), &json!({}))?;
    let user_msg = templates.render(
        &Prompt::StoryRequest.to_string(),
        &json!({"keywords": keywords}),
    )?;

    tracing::info!("Writing a story about: {}", keywords);
    let story = chat(client, &user_msg, &system_msg).await?;
    Ok(story)
}
