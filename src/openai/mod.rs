//! Client for OpenAI compatible chat completion APIs.
pub mod chat;
mod core;
pub mod error;

pub use self::core::*;
pub use error::CompletionError;
