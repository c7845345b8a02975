use anyhow::Result;
use funhouse::cli;

#[tokio::main]
async fn main() -> Result<()> {
    cli::run().await
}
