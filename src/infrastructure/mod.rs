pub mod entities;
pub mod ollama;
pub mod repositories;
pub mod traits;
