use anyhow::{Context, Result};
use std::fs;
use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;

use crate::ai::agents::writer::{self, DEFAULT_WRITING_SAMPLE, WRITING_TOPICS};
use crate::openai::Client;

fn read_writing(file: Option<PathBuf>, sample: bool) -> Result<String> {
    if sample {
        return Ok(DEFAULT_WRITING_SAMPLE.to_string());
    }

    if let Some(path) = file {
        return fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()));
    }

    let mut stdin = io::stdin();
    if stdin.is_terminal() {
        println!("Need some ideas?");
        for (title, question) in WRITING_TOPICS {
            println!("  - {}: {}", title, question);
        }
        println!("\nWrite your English here, then press Ctrl-D to hand it in:\n");
    }

    let mut text = String::new();
    stdin
        .read_to_string(&mut text)
        .context("Failed to read writing from stdin")?;
    Ok(text)
}

pub async fn run(client: Option<&Client>, file: Option<PathBuf>, sample: bool) -> Result<()> {
    let text = read_writing(file, sample)?;
    let feedback = writer::correct(client, &text).await?;
    println!("\n{}", feedback);
    println!("\n🎉 Great work! Keep practicing and your English will keep getting better!");
    Ok(())
}
