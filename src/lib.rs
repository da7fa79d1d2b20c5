//! HTTP relay streaming replies from a local Ollama model - Library exports for testing
//!

pub mod api;
pub mod config;
pub mod core;
pub mod infrastructure;
