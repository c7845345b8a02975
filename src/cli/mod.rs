use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod chat;
pub mod story;
pub mod write;

use crate::ai::agents::story::DEFAULT_KEYWORDS;
use crate::ai::chat::ChatRole;
use crate::core::AppConfig;
use crate::openai::Client;

#[derive(Subcommand)]
enum Command {
    /// Write a short English story from a few keywords
    Story {
        /// One to three English words, separated by commas
        #[arg(long, default_value = DEFAULT_KEYWORDS)]
        keywords: String,
    },
    /// Chat in English with a fun character
    Chat {
        #[arg(long, value_enum, default_value_t = ChatRole::Alien)]
        role: ChatRole,
    },
    /// Have a friendly teacher correct your English writing
    Write {
        /// Read the writing from a file instead of stdin
        #[arg(long)]
        file: Option<PathBuf>,
        /// Use the built-in sample writing
        #[arg(long, action, default_value = "false")]
        sample: bool,
    },
    /// List the characters you can chat with
    Roles {},
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// API key, overrides OPENAI_API_KEY
    #[arg(long, global = true)]
    api_key: Option<String>,
    /// API base URL, overrides OPENAI_API_BASE
    #[arg(long, global = true)]
    api_base: Option<String>,
    /// Model name, overrides OPENAI_MODEL
    #[arg(long, global = true)]
    model: Option<String>,
    #[command(subcommand)]
    command: Option<Command>,
}

fn init_tracing() {
    // Logs go to stderr, replies go to stdout
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=info", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Returns `None` when no API key is configured. Activities report
/// that to the user themselves.
fn connect(config: &AppConfig) -> Option<Client> {
    if !config.is_configured() {
        tracing::warn!("OPENAI_API_KEY is not set, replies are disabled");
        return None;
    }
    Client::from_config(config)
        .inspect_err(|e| tracing::warn!("Completion client not configured: {}", e))
        .ok()
}

pub async fn run() -> Result<()> {
    let args = Cli::parse();
    init_tracing();

    let mut config = AppConfig::from_env()?;
    if let Some(api_key) = args.api_key {
        config.api_key = api_key;
    }
    if let Some(api_base) = args.api_base {
        config.api_base = api_base;
    }
    if let Some(model) = args.model {
        config.model = model;
    }

    // Handle each sub command
    match args.command {
        Some(Command::Story { keywords }) => {
            story::run(connect(&config).as_ref(), &keywords).await?;
        }
        Some(Command::Chat { role }) => {
            chat::run(connect(&config), role).await?;
        }
        Some(Command::Write { file, sample }) => {
            write::run(connect(&config).as_ref(), file, sample).await?;
        }
        Some(Command::Roles {}) => {
            for role in ChatRole::ALL {
                let flag = role
                    .to_possible_value()
                    .map(|v| v.get_name().to_string())
                    .unwrap_or_default();
                println!("{} {:<16} {}", role.emoji(), flag, role.description());
            }
        }
        None => {}
    }

    Ok(())
}
