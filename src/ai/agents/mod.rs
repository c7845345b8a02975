pub mod story;
pub mod writer;
