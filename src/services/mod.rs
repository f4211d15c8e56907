pub mod batch;
pub mod chat;
pub mod export;
pub mod image;
pub mod import;
pub mod infographic;
pub mod llm;
pub mod prompt;
pub mod setup;
pub mod story;
