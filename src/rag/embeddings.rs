use anyhow::Result;
use fastembed::{InitOptionsUserDefined, TextEmbedding, TokenizerFiles, UserDefinedEmbeddingModel};
use std::path::Path;

use super::Embedder;

/// all-MiniLM-L6-v2 output size.
pub const EMBEDDING_DIM: u64 = 384;

pub struct EmbeddingGenerator {
    model: TextEmbedding,
}

fn read_model_file(model_dir: &Path, name: &str) -> Result<Vec<u8>> {
    std::fs::read(model_dir.join(name)).map_err(|e| anyhow::anyhow!("Failed to read {}: {}", name, e))
}

impl EmbeddingGenerator {
    /// Loads an ONNX sentence-transformer exported to `model_dir`.
    pub async fn new(model_dir: &Path) -> Result<Self> {
        tracing::info!("Initializing embedding model from {}", model_dir.display());

        if !model_dir.exists() {
            anyhow::bail!("Model directory not found: {}", model_dir.display());
        }

        let user_model = UserDefinedEmbeddingModel {
            onnx_file: read_model_file(model_dir, "model.onnx")?,
            tokenizer_files: TokenizerFiles {
                tokenizer_file: read_model_file(model_dir, "tokenizer.json")?,
                config_file: read_model_file(model_dir, "config.json")?,
                special_tokens_map_file: read_model_file(model_dir, "special_tokens_map.json")?,
                tokenizer_config_file: read_model_file(model_dir, "tokenizer_config.json")?,
            },
        };

        let model = TextEmbedding::try_new_from_user_defined(user_model, InitOptionsUserDefined::default())
            .map_err(|e| anyhow::anyhow!("Failed to initialize embedding model: {}", e))?;

        tracing::info!("Embedding model initialized successfully");
        Ok(Self { model })
    }

    pub fn generate(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let embeddings = self.model.embed(texts, None)?;
        Ok(embeddings)
    }
}

impl Embedder for EmbeddingGenerator {
    fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        self.generate(texts)
    }
}
