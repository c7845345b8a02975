use thiserror::Error;

use crate::openai::CompletionError;

#[derive(Error, Debug)]
pub enum ActivityError {
    #[error("{0}")]
    EmptyInput(&'static str),

    #[error("Failed to render prompt: {0}")]
    Template(#[from] handlebars::RenderError),

    #[error(transparent)]
    Completion(#[from] CompletionError),
}
