//! Built-in provider adapters.

pub mod groq;
pub mod ollama;

pub use groq::GroqAdapter;
pub use ollama::OllamaAdapter;
