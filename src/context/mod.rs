//! Context retrieval subsystem: similarity search, neighbor expansion, and
//! chunk-group merging.

pub mod merger;
pub mod retriever;

pub use merger::merge_groups;
pub use retriever::{ContextRetriever, RetrievalConfig, RetrievalMetricsSnapshot};
