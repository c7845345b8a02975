use anyhow::Result;

use crate::ai::agents::story;
use crate::openai::Client;

pub async fn run(client: Option<&Client>, keywords: &str) -> Result<()> {
    println!("Claude is thinking... ✨\n");
    let story = story::generate(client, keywords).await?;
    println!("{}", story);
    Ok(())
}
