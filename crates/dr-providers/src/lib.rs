//! dr-providers: Research backend implementations for deep-research-mcp
//!
//! This crate provides implementations of the ResearchBackend trait.

pub mod gemini;

pub use gemini::GeminiInteractions;
