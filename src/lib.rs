pub mod classifier;
pub mod config;
pub mod engine;
pub mod errors;
pub mod jobs;
pub mod llm;
pub mod logging;
pub mod pipeline;
pub mod prompts;
pub mod repair;
pub mod server;
pub mod ui;
