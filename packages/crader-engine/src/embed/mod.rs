//! Staged, deduplicated, provider-bounded embedding.

pub mod pipeline;
pub mod provider;

pub use pipeline::{enrichment_context, vector_hash, EmbedProgress, EmbedReport, EmbeddingPipeline};
pub use provider::{EmbeddingProvider, HashProvider, OpenAiProvider};
