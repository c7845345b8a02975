use serde_json::json;

use crate::ai::ActivityError;
use crate::ai::prompt::{self, Prompt};
use crate::openai::Client;
use crate::openai::chat::chat;

pub const DEFAULT_WRITING_SAMPLE: &str = "I go to school every day. My favorite subject is English. I like read books and play games. Yesterday I go to the park with my friend. We are very happy!";

/// Ideas for kids who don't know what to write about.
pub const WRITING_TOPICS: [(&str, &str); 6] = [
    ("My Day", "What did you do today?"),
    ("My Friend", "Tell me about your best friend"),
    ("My Dream", "What do you want to be when you grow up?"),
    ("My Hobby", "What do you like to do in your free time?"),
    ("My Pet", "Do you have a pet? Tell me about it!"),
    ("My School", "What is your school like?"),
];

/// Little writer: a friendly teacher corrects the child's English
/// writing and returns Markdown feedback.
pub async fn correct(client: Option<&Client>, text: &str) -> Result<String, ActivityError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ActivityError::EmptyInput("Please write something before handing it in!"));
    }

    let templates = prompt::templates();
    let system_msg = templates.render(&Prompt::WriterSystem.to_string(), &json!({}))?;
    let user_msg = templates.render(&Prompt::WriterRequest.to_string(), &json!({"text": text}))?;

    tracing::info!("Correcting {} words of writing", text.split_whitespace().count());
    let feedback = chat(client, &user_msg, &system_msg).await?;
    Ok(feedback)
}
