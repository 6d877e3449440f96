use anyhow::Result;
use async_trait::async_trait;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, Distance, Filter, PointStruct,
    SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use serde_json::{Map as JsonMap, Value as JsonValue};
use uuid::Uuid;

use super::embeddings::EMBEDDING_DIM;
use super::{KnowledgeStore, SearchHit};
use crate::indexer::corpus::{Corpus, KnowledgeDocument};

pub struct VectorStore {
    client: Qdrant,
    collection_name: String,
}

/// Stable id so re-loading a corpus overwrites instead of duplicating.
pub fn point_id(doc: &KnowledgeDocument) -> Uuid {
    let key = format!("{}:{}:{}", doc.corpus, doc.entry_id, doc.chunk_index);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes())
}

fn payload_for(doc: &KnowledgeDocument) -> JsonMap<String, JsonValue> {
    let mut payload = JsonMap::new();
    payload.insert("text".to_string(), JsonValue::String(doc.text.clone()));
    payload.insert("source".to_string(), JsonValue::String(doc.source.clone()));
    payload.insert("corpus".to_string(), JsonValue::String(doc.corpus.as_str().to_string()));
    payload.insert("entry_id".to_string(), JsonValue::from(doc.entry_id));
    payload.insert("chunk_index".to_string(), JsonValue::from(doc.chunk_index));
    payload
}

impl VectorStore {
    pub async fn new(url: &str, collection_name: &str) -> Result<Self> {
        tracing::info!("Building Qdrant client for URL: {}", url);
        let client = match Qdrant::from_url(url).build() {
            Ok(c) => c,
            Err(e) => {
                tracing::error!("Qdrant client build failed: {:?}", e);
                anyhow::bail!("Qdrant client build failed: {}", e);
            }
        };

        let store = Self {
            client,
            collection_name: collection_name.to_string(),
        };

        if let Err(e) = store.ensure_collection().await {
            tracing::error!("Qdrant ensure_collection failed: {:?}", e);
            return Err(e);
        }
        tracing::info!("Qdrant collection '{}' ready", collection_name);

        Ok(store)
    }

    async fn ensure_collection(&self) -> Result<()> {
        if !self.client.collection_exists(&self.collection_name).await? {
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&self.collection_name)
                        .vectors_config(VectorParamsBuilder::new(EMBEDDING_DIM, Distance::Cosine)),
                )
                .await?;
        }
        Ok(())
    }

    pub async fn upsert_documents(
        &self,
        docs: &[KnowledgeDocument],
        embeddings: Vec<Vec<f32>>,
    ) -> Result<()> {
        if docs.len() != embeddings.len() {
            anyhow::bail!(
                "{} documents but {} embeddings",
                docs.len(),
                embeddings.len()
            );
        }

        let points: Vec<PointStruct> = docs
            .iter()
            .zip(embeddings)
            .map(|(doc, vector)| PointStruct::new(point_id(doc).to_string(), vector, payload_for(doc)))
            .collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection_name, points).wait(true))
            .await?;

        Ok(())
    }

    /// Points already loaded for a corpus.
    pub async fn count_corpus(&self, corpus: Corpus) -> Result<u64> {
        let response = self
            .client
            .count(
                CountPointsBuilder::new(&self.collection_name)
                    .filter(Filter::must([Condition::matches(
                        "corpus",
                        corpus.as_str().to_string(),
                    )]))
                    .exact(true),
            )
            .await?;

        Ok(response.result.map(|r| r.count).unwrap_or(0))
    }

    pub async fn search_hits(&self, query_vector: Vec<f32>, limit: u64) -> Result<Vec<SearchHit>> {
        let search_result = self
            .client
            .search_points(
                SearchPointsBuilder::new(&self.collection_name, query_vector, limit)
                    .with_payload(true),
            )
            .await?;

        let hits = search_result
            .result
            .into_iter()
            .filter_map(|point| {
                let text = point.payload.get("text")?.as_str()?.to_string();
                let source = point
                    .payload
                    .get("source")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
                    .unwrap_or_default();
                Some(SearchHit {
                    text,
                    source,
                    score: point.score,
                })
            })
            .collect();

        Ok(hits)
    }
}

#[async_trait]
impl KnowledgeStore for VectorStore {
    async fn search(&self, vector: Vec<f32>, limit: u64) -> Result<Vec<SearchHit>> {
        self.search_hits(vector, limit).await
    }
}
