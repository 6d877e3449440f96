pub mod categories;
pub mod embeddings;
pub mod input;
pub mod json_repair;
pub mod pipeline;
pub mod prompt;
pub mod retrieval;
pub mod terms;
pub mod vector_store;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use self::embeddings::EmbeddingGenerator;
use self::vector_store::VectorStore;

/// Sentence embedding model. Calls are CPU-bound and synchronous.
pub trait Embedder: Send + Sync {
    fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub text: String,
    pub source: String,
    pub score: f32,
}

#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn search(&self, vector: Vec<f32>, limit: u64) -> Result<Vec<SearchHit>>;
}

/// Embedding model plus the vector index it was built with.
#[derive(Clone)]
pub struct KnowledgeBase {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn KnowledgeStore>,
}

impl KnowledgeBase {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn KnowledgeStore>) -> Self {
        Self { embedder, store }
    }

    pub async fn connect(model_dir: &Path, qdrant_url: &str, collection: &str) -> Result<Self> {
        let embedder = EmbeddingGenerator::new(model_dir).await?;
        let store = VectorStore::new(qdrant_url, collection).await?;
        Ok(Self::new(Arc::new(embedder), Arc::new(store)))
    }

    /// Embeds on the blocking pool.
    pub async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let embedder = Arc::clone(&self.embedder);
        tokio::task::spawn_blocking(move || embedder.embed(texts))
            .await
            .context("embedding task failed")?
    }

    pub async fn search(&self, vector: Vec<f32>, limit: u64) -> Result<Vec<SearchHit>> {
        self.store.search(vector, limit).await
    }
}
