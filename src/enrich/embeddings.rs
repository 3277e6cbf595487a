//! Embedding backfill
//! Fills NULL embedding columns in batches; monotonic (a non-null vector is
//! never overwritten), so concurrent runs and re-runs are safe.

use std::sync::Arc;
use tracing::{info, warn};

use crate::data::DataResult;
use crate::kb::KnowledgeBase;
use crate::providers::Embedder;

#[derive(Debug, Default)]
pub struct BackfillReport {
    pub embedded: usize,
    pub failed: usize,
}

pub struct EmbeddingEnricher {
    kb: Arc<KnowledgeBase>,
    embedder: Arc<dyn Embedder>,
}

impl EmbeddingEnricher {
    pub fn new(kb: Arc<KnowledgeBase>, embedder: Arc<dyn Embedder>) -> Self {
        Self { kb, embedder }
    }

    pub async fn backfill_embeddings(
        &self,
        limit: i64,
        batch_size: usize,
    ) -> DataResult<BackfillReport> {
        let pending = self.kb.select_unembedded(limit).await?;
        if pending.is_empty() {
            return Ok(BackfillReport::default());
        }
        info!(
            "Backfilling embeddings for {} rows via '{}'",
            pending.len(),
            self.embedder.name()
        );

        let mut report = BackfillReport::default();
        for batch in pending.chunks(batch_size.max(1)) {
            for entry in batch {
                match self.embedder.embed(&entry.content).await {
                    Ok(vector) => {
                        if self.kb.update_embedding(entry.id, vector).await? {
                            report.embedded += 1;
                        }
                    }
                    Err(e) => {
                        warn!("Embedding failed for KB {}: {}", entry.id, e);
                        report.failed += 1;
                    }
                }
            }
        }

        // The IVF-flat index becomes worthwhile once enough rows carry
        // vectors; cheap no-op otherwise.
        self.kb.ensure_vector_index().await?;

        info!(
            "Embedding backfill done: {} embedded, {} failed",
            report.embedded, report.failed
        );
        Ok(report)
    }
}
