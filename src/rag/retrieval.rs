//! Multi-query category retrieval plus HyDE, merged into one context block.

use std::collections::HashMap;

use anyhow::Result;
use futures::future::join_all;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tiktoken_rs::CoreBPE;

use super::categories::category_queries;
use super::input::HealthInput;
use super::prompt::{hyde_prompt, SYSTEM_PROMPT};
use super::{KnowledgeBase, SearchHit};
use crate::llm::{LlmClient, LlmRequest};

pub const HYDE_LABEL: &str = "延伸知識";
pub const QUERY_LABEL: &str = "提問";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RetrievalSettings {
    pub category_top_k: u64,
    pub hyde_top_k: u64,
    pub max_context_docs: usize,
    pub max_context_tokens: usize,
    pub enable_hyde: bool,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            category_top_k: 2,
            hyde_top_k: 3,
            max_context_docs: 12,
            max_context_tokens: 2048,
            enable_hyde: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedDoc {
    pub label: String,
    pub text: String,
    pub source: String,
    pub score: f32,
}

static BPE: Lazy<Option<CoreBPE>> = Lazy::new(|| match tiktoken_rs::cl100k_base() {
    Ok(bpe) => Some(bpe),
    Err(e) => {
        tracing::warn!("cl100k tokenizer unavailable, counting chars instead: {}", e);
        None
    }
});

pub fn count_tokens(text: &str) -> usize {
    match BPE.as_ref() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => text.chars().count(),
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// De-duplicates by normalized text keeping the best score, preserves the
/// order of first appearance (category groups in order, then HyDE), and
/// applies the document and token caps.
pub fn merge_hits(
    groups: Vec<(String, Vec<SearchHit>)>,
    settings: &RetrievalSettings,
) -> Vec<RetrievedDoc> {
    let mut merged: Vec<RetrievedDoc> = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();

    for (label, hits) in groups {
        for hit in hits {
            let key = normalize(&hit.text);
            if key.is_empty() {
                continue;
            }
            match seen.get(&key) {
                Some(&idx) => {
                    if hit.score > merged[idx].score {
                        merged[idx].score = hit.score;
                    }
                }
                None => {
                    seen.insert(key, merged.len());
                    merged.push(RetrievedDoc {
                        label: label.clone(),
                        text: hit.text.trim().to_string(),
                        source: hit.source,
                        score: hit.score,
                    });
                }
            }
        }
    }

    merged.truncate(settings.max_context_docs);

    let mut used = 0;
    let mut kept = Vec::with_capacity(merged.len());
    for doc in merged {
        let tokens = count_tokens(&doc.text);
        if used + tokens > settings.max_context_tokens {
            tracing::debug!(
                "Context token budget reached at {} docs ({} tokens)",
                kept.len(),
                used
            );
            break;
        }
        used += tokens;
        kept.push(doc);
    }
    kept
}

/// `【label】` sections, consecutive docs of one label grouped together.
pub fn render_context(docs: &[RetrievedDoc]) -> String {
    let mut sections: Vec<(String, Vec<&str>)> = Vec::new();
    for doc in docs {
        match sections.last_mut() {
            Some((label, texts)) if *label == doc.label => texts.push(&doc.text),
            _ => sections.push((doc.label.clone(), vec![&doc.text])),
        }
    }
    sections
        .into_iter()
        .map(|(label, texts)| format!("【{}】\n{}", label, texts.join("\n\n")))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Searches with a hypothetical answer written by the model. Never fails;
/// problems are logged and yield no hits.
async fn hyde_hits(
    kb: &KnowledgeBase,
    llm: &dyn LlmClient,
    subject: &str,
    settings: &RetrievalSettings,
) -> Vec<SearchHit> {
    if !settings.enable_hyde || settings.hyde_top_k == 0 {
        return Vec::new();
    }

    let request = LlmRequest::text(hyde_prompt(subject)).with_system(SYSTEM_PROMPT);
    let passage = match llm.generate(&request).await {
        Ok(p) if !p.trim().is_empty() => p,
        Ok(_) => {
            tracing::warn!("HyDE passage was empty");
            return Vec::new();
        }
        Err(e) => {
            tracing::warn!("HyDE generation failed, using category retrieval only: {}", e);
            return Vec::new();
        }
    };

    let hits = async {
        let vector = kb.embed(vec![passage]).await?.into_iter().next();
        match vector {
            Some(v) => kb.search(v, settings.hyde_top_k).await,
            None => Ok(Vec::new()),
        }
    }
    .await;

    hits.unwrap_or_else(|e| {
        tracing::warn!("HyDE search failed: {}", e);
        Vec::new()
    })
}

/// Embeds all queries in one batch and searches them concurrently.
async fn search_queries(
    kb: &KnowledgeBase,
    queries: Vec<(String, String)>,
    top_k: u64,
) -> Result<Vec<(String, Vec<SearchHit>)>> {
    let texts = queries.iter().map(|(_, q)| q.clone()).collect();
    let vectors = kb.embed(texts).await?;

    let searches = queries
        .into_iter()
        .zip(vectors)
        .map(|((label, _), vector)| async move { (label, kb.search(vector, top_k).await) });

    let mut groups = Vec::new();
    let mut failures = 0;
    for (label, result) in join_all(searches).await {
        match result {
            Ok(hits) => groups.push((label, hits)),
            Err(e) => {
                tracing::warn!("Search for {} failed: {}", label, e);
                failures += 1;
            }
        }
    }

    if groups.is_empty() && failures > 0 {
        anyhow::bail!("all {} knowledge searches failed", failures);
    }
    Ok(groups)
}

async fn retrieve(
    kb: &KnowledgeBase,
    llm: &dyn LlmClient,
    queries: Vec<(String, String)>,
    hyde_subject: &str,
    settings: &RetrievalSettings,
) -> Result<Vec<RetrievedDoc>> {
    let (groups, hyde) = tokio::join!(
        search_queries(kb, queries, settings.category_top_k),
        hyde_hits(kb, llm, hyde_subject, settings),
    );

    let mut groups = match groups {
        Ok(groups) => groups,
        // HyDE alone still gives usable context
        Err(e) if !hyde.is_empty() => {
            tracing::warn!("Category retrieval failed, using HyDE hits only: {}", e);
            Vec::new()
        }
        Err(e) => return Err(e),
    };
    groups.push((HYDE_LABEL.to_string(), hyde));

    let docs = merge_hits(groups, settings);
    tracing::info!("Retrieved {} knowledge documents", docs.len());
    Ok(docs)
}

/// Context for a health input: one query per category present plus HyDE.
pub async fn retrieve_for_input(
    kb: &KnowledgeBase,
    llm: &dyn LlmClient,
    input: &HealthInput,
    settings: &RetrievalSettings,
) -> Result<Vec<RetrievedDoc>> {
    let queries = category_queries(input)
        .into_iter()
        .map(|q| (q.label().to_string(), q.query))
        .collect();
    retrieve(kb, llm, queries, &input.render(), settings).await
}

/// Context for a free-form question.
pub async fn retrieve_for_query(
    kb: &KnowledgeBase,
    llm: &dyn LlmClient,
    query: &str,
    settings: &RetrievalSettings,
) -> Result<Vec<RetrievedDoc>> {
    let queries = vec![(QUERY_LABEL.to_string(), query.to_string())];
    retrieve(kb, llm, queries, query, settings).await
}
