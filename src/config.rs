//! Runtime configuration, assembled from environment variables with defaults
//! for every control knob named in the external-interface contract.

use std::time::Duration;

use clap::Parser;

use crate::types::RetrievalStrategy;

/// Control knobs for the memory pipeline. Every field corresponds to one row
/// of the control-knob table: chunker target/overlap, context retrieval
/// parameters, conversation window sizing, prompt budget, extraction
/// concurrency, and per-call timeouts.
#[derive(Parser, Debug, Clone)]
#[command(name = "memoria", about = "Conversational memory service")]
pub struct Config {
    /// Target chunk size in tokens
    #[arg(long, env = "MEMORIA_CHUNKER_TARGET_TOKENS", default_value_t = 256)]
    pub chunker_target_tokens: usize,

    /// Overlap between chunks in tokens, used when overlap mode is enabled
    #[arg(long, env = "MEMORIA_CHUNKER_OVERLAP_TOKENS", default_value_t = 50)]
    pub chunker_overlap_tokens: usize,

    /// Neighboring chunks taken before each retrieval hit
    #[arg(long, env = "MEMORIA_CONTEXT_CHUNKS_BEFORE", default_value_t = 2)]
    pub context_chunks_before: usize,

    /// Neighboring chunks taken after each retrieval hit
    #[arg(long, env = "MEMORIA_CONTEXT_CHUNKS_AFTER", default_value_t = 2)]
    pub context_chunks_after: usize,

    /// Initial similarity-search result limit
    #[arg(long, env = "MEMORIA_CONTEXT_MAX_SIMILAR", default_value_t = 5)]
    pub context_max_similar: usize,

    /// Similarity cutoff for retrieval
    #[arg(long, env = "MEMORIA_CONTEXT_SIMILARITY_THRESHOLD", default_value_t = 0.3)]
    pub context_similarity_threshold: f32,

    /// Retrieval strategy: fixed, adaptive, or intelligent
    #[arg(long, env = "MEMORIA_CONTEXT_RETRIEVAL_STRATEGY", default_value = "adaptive")]
    pub context_retrieval_strategy: RetrievalStrategy,

    /// Rolling window size before summarization is triggered
    #[arg(long, env = "MEMORIA_CONVERSATION_WINDOW_SIZE", default_value_t = 10)]
    pub conversation_window_size: usize,

    /// Idle eviction horizon for conversation windows, in hours
    #[arg(long, env = "MEMORIA_CONVERSATION_RETENTION_HOURS", default_value_t = 24)]
    pub conversation_retention_hours: i64,

    /// How often the eviction sweep runs, in minutes
    #[arg(long, env = "MEMORIA_CONVERSATION_CLEANUP_INTERVAL_MINUTES", default_value_t = 10)]
    pub conversation_cleanup_interval_minutes: u64,

    /// Hard prompt budget, in characters
    #[arg(long, env = "MEMORIA_PROMPT_MAX_LENGTH", default_value_t = 4000)]
    pub prompt_max_length: usize,

    /// Whether to enforce the prompt budget via truncation
    #[arg(long, env = "MEMORIA_PROMPT_ENABLE_TRUNCATION", default_value_t = true)]
    pub prompt_enable_truncation: bool,

    /// Parallelism cap for concurrent extraction calls
    #[arg(long, env = "MEMORIA_EXTRACTION_MAX_CONCURRENT_REQUESTS", default_value_t = 5)]
    pub extraction_max_concurrent_requests: usize,

    /// Embedder call deadline, in milliseconds
    #[arg(long, env = "MEMORIA_TIMEOUT_EMBED_MS", default_value_t = 30_000)]
    pub timeout_embed_ms: u64,

    /// Generator call deadline, in milliseconds
    #[arg(long, env = "MEMORIA_TIMEOUT_GENERATE_MS", default_value_t = 30_000)]
    pub timeout_generate_ms: u64,

    /// Extraction call deadline, in milliseconds (shares the generator endpoint)
    #[arg(long, env = "MEMORIA_TIMEOUT_EXTRACT_MS", default_value_t = 30_000)]
    pub timeout_extract_ms: u64,

    /// Health-check call deadline, in milliseconds
    #[arg(long, env = "MEMORIA_TIMEOUT_HEALTH_MS", default_value_t = 5_000)]
    pub timeout_health_ms: u64,

    /// Generator HTTP endpoint
    #[arg(long, env = "MEMORIA_GENERATOR_ENDPOINT", default_value = "http://localhost:11434/api/generate")]
    pub generator_endpoint: String,

    /// Model name sent in generator requests
    #[arg(long, env = "MEMORIA_GENERATOR_MODEL", default_value = "default")]
    pub generator_model: String,

    /// Embedder HTTP endpoint
    #[arg(long, env = "MEMORIA_EMBEDDER_ENDPOINT", default_value = "http://localhost:11434/api/embeddings")]
    pub embedder_endpoint: String,

    /// Model name sent in embedder requests
    #[arg(long, env = "MEMORIA_EMBEDDER_MODEL", default_value = "default")]
    pub embedder_model: String,

    /// SQLite database path, or ":memory:" for an ephemeral store
    #[arg(long, env = "MEMORIA_DB_PATH", default_value = ":memory:")]
    pub db_path: String,
}

impl Config {
    pub fn embed_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_embed_ms)
    }

    pub fn generate_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_generate_ms)
    }

    pub fn extract_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_extract_ms)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_health_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunker_target_tokens: 256,
            chunker_overlap_tokens: 50,
            context_chunks_before: 2,
            context_chunks_after: 2,
            context_max_similar: 5,
            context_similarity_threshold: 0.3,
            context_retrieval_strategy: RetrievalStrategy::Adaptive,
            conversation_window_size: 10,
            conversation_retention_hours: 24,
            conversation_cleanup_interval_minutes: 10,
            prompt_max_length: 4000,
            prompt_enable_truncation: true,
            extraction_max_concurrent_requests: 5,
            timeout_embed_ms: 30_000,
            timeout_generate_ms: 30_000,
            timeout_extract_ms: 30_000,
            timeout_health_ms: 5_000,
            generator_endpoint: "http://localhost:11434/api/generate".to_string(),
            generator_model: "default".to_string(),
            embedder_endpoint: "http://localhost:11434/api/embeddings".to_string(),
            embedder_model: "default".to_string(),
            db_path: ":memory:".to_string(),
        }
    }
}
