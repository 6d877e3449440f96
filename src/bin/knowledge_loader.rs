use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};

use healthcheck_rag::config::Settings;
use healthcheck_rag::indexer::corpus::{parse_corpus, Corpus, KnowledgeDocument};
use healthcheck_rag::rag::embeddings::EmbeddingGenerator;
use healthcheck_rag::rag::vector_store::VectorStore;

const BATCH_SIZE: usize = 32;

#[derive(Parser, Debug)]
#[command(name = "knowledge-loader")]
#[command(about = "Load medical Q&A corpora into the knowledge vector store")]
struct Args {
    /// MedicalGPT / Huatuo conversations JSON
    #[arg(long)]
    medical: Option<PathBuf>,

    /// Toyhom doctor-patient dialogue JSON
    #[arg(long)]
    dialogue: Option<PathBuf>,

    /// Reload a corpus even if the collection already holds it
    #[arg(long)]
    force: bool,

    /// Qdrant server URL (defaults to the service settings)
    #[arg(long)]
    qdrant_url: Option<String>,

    /// Qdrant collection name
    #[arg(long)]
    collection: Option<String>,

    /// Directory holding the ONNX embedding model
    #[arg(long)]
    model_dir: Option<PathBuf>,
}

#[derive(Debug, Default)]
struct LoadSummary {
    entries: usize,
    skipped_entries: usize,
    chunks: usize,
    failed_batches: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    if args.medical.is_none() && args.dialogue.is_none() {
        anyhow::bail!("Nothing to load: pass --medical and/or --dialogue");
    }

    let settings = Settings::load()?;
    let qdrant_url = args.qdrant_url.clone().unwrap_or(settings.qdrant_url);
    let collection = args.collection.clone().unwrap_or(settings.collection);
    let model_dir = args
        .model_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(settings.embedding_model_dir));

    println!("Initializing embedding model from {}...", model_dir.display());
    let embeddings = EmbeddingGenerator::new(&model_dir).await?;

    println!("Connecting to Qdrant at {}...", qdrant_url);
    let vector_store = VectorStore::new(&qdrant_url, &collection).await?;

    let sources = [(Corpus::Medical, &args.medical), (Corpus::Dialogue, &args.dialogue)];
    for (corpus, path) in sources {
        let Some(path) = path else { continue };

        let existing = vector_store.count_corpus(corpus).await?;
        if existing > 0 && !args.force {
            println!(
                "\nCollection already holds {} {} chunks, skipping {} (use --force to reload)",
                existing,
                corpus,
                path.display()
            );
            continue;
        }

        let summary = load_corpus(corpus, path, &embeddings, &vector_store).await?;

        println!("\n{} corpus loaded from {}", corpus, path.display());
        println!("  Entries:         {}", summary.entries);
        println!("  Entries skipped: {}", summary.skipped_entries);
        println!("  Chunks stored:   {}", summary.chunks);
        println!("  Failed batches:  {}", summary.failed_batches);
    }

    println!("\n  Collection:      {}", collection);
    println!("  Qdrant URL:      {}", qdrant_url);

    Ok(())
}

async fn load_corpus(
    corpus: Corpus,
    path: &Path,
    embeddings: &EmbeddingGenerator,
    vector_store: &VectorStore,
) -> Result<LoadSummary> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let parsed = parse_corpus(corpus, &raw)?;

    let mut summary = LoadSummary {
        entries: parsed.entries,
        skipped_entries: parsed.skipped,
        ..Default::default()
    };
    if parsed.documents.is_empty() {
        tracing::warn!("{} yielded no documents", path.display());
        return Ok(summary);
    }

    let pb = ProgressBar::new(parsed.documents.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );
    pb.set_message(corpus.to_string());

    for batch in parsed.documents.chunks(BATCH_SIZE) {
        match store_batch(batch, embeddings, vector_store).await {
            Ok(()) => summary.chunks += batch.len(),
            Err(e) => {
                tracing::warn!("Failed to store {} batch: {}", corpus, e);
                summary.failed_batches += 1;
            }
        }
        pb.inc(batch.len() as u64);
    }

    pb.finish_with_message("done");
    Ok(summary)
}

async fn store_batch(
    batch: &[KnowledgeDocument],
    embeddings: &EmbeddingGenerator,
    vector_store: &VectorStore,
) -> Result<()> {
    let texts: Vec<String> = batch.iter().map(|d| d.text.clone()).collect();
    let vectors = embeddings.generate(texts)?;
    vector_store.upsert_documents(batch, vectors).await
}
