//! In-place enrichment of knowledge-base rows: sentiment, embeddings, and
//! post-event outcomes. Each enricher only ever fills NULL columns, so the
//! order they run in never changes the final row contents.

pub mod embeddings;
pub mod outcomes;
pub mod sentiment;

pub use embeddings::EmbeddingEnricher;
pub use outcomes::OutcomeAnalyzer;
pub use sentiment::SentimentEnricher;
