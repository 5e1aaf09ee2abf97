//! Memoria - conversational memory service
//!
//! Chunking, semantic retrieval, conversation-window summarization, and
//! key-information extraction wired into a single turn-handling pipeline.

pub mod chain;
pub mod chunker;
pub mod config;
pub mod context;
pub mod embedding;
pub mod error;
pub mod extraction;
pub mod generator;
pub mod orchestrator;
pub mod prompt;
pub mod storage;
pub mod summary;
pub mod types;
pub mod vector_index;
pub mod window;

pub use error::{MemoriaError, Result};
pub use orchestrator::Orchestrator;
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
