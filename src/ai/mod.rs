//! The three guided activities built on top of the completion client.
pub mod agents;
pub mod chat;
mod error;
pub mod prompt;

pub use error::ActivityError;
