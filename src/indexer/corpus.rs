//! Parsers for the medical Q&A corpora loaded into the knowledge base.
//!
//! Two layouts are understood:
//! - MedicalGPT / Huatuo ShareGPT dumps: an array of entries with a
//!   `conversations` list of `{from|role, value|text}` turns.
//! - Toyhom dialogue dumps: an array of `{question, answer, source}`.

use std::fmt;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::chunker::chunk_text;

/// all-MiniLM-L6-v2 truncates at 256 word pieces; CJK text is roughly one per char.
pub const MAX_CHUNK_CHARS: usize = 200;
pub const CHUNK_OVERLAP: usize = 20;

pub const MEDICALGPT_SOURCE: &str = "medicalgpt";
pub const TOYHOM_PREFIX: &str = "Toyhom_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Corpus {
    Medical,
    Dialogue,
}

impl Corpus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Corpus::Medical => "medical",
            Corpus::Dialogue => "dialogue",
        }
    }
}

impl fmt::Display for Corpus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One embeddable chunk of a knowledge entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub text: String,
    pub source: String,
    pub corpus: Corpus,
    pub entry_id: usize,
    pub chunk_index: usize,
}

#[derive(Debug, Default)]
pub struct ParsedCorpus {
    pub documents: Vec<KnowledgeDocument>,
    pub entries: usize,
    pub skipped: usize,
}

pub fn parse_corpus(corpus: Corpus, raw: &str) -> Result<ParsedCorpus> {
    let entries: Vec<Value> =
        serde_json::from_str(raw).with_context(|| format!("{} corpus is not a JSON array", corpus))?;

    let mut parsed = ParsedCorpus {
        entries: entries.len(),
        ..Default::default()
    };

    for (entry_id, entry) in entries.iter().enumerate() {
        let pairs = match corpus {
            Corpus::Medical => medical_pairs(entry),
            Corpus::Dialogue => dialogue_pair(entry).into_iter().collect(),
        };

        let Some(pairs) = non_empty(pairs) else {
            tracing::debug!("Skipping {} entry {}: no usable Q&A", corpus, entry_id);
            parsed.skipped += 1;
            continue;
        };

        // chunk_index runs across every pair of the entry
        let mut next_index = 0;
        for pair in pairs {
            let docs = pair.into_documents(corpus, entry_id, next_index);
            next_index += docs.len();
            parsed.documents.extend(docs);
        }
    }

    Ok(parsed)
}

fn non_empty(pairs: Vec<QaPair>) -> Option<Vec<QaPair>> {
    (!pairs.is_empty()).then_some(pairs)
}

#[derive(Debug, Clone, PartialEq)]
struct QaPair {
    question: String,
    answer: String,
    source: String,
}

impl QaPair {
    /// Long answers are split; every chunk keeps the question header.
    fn into_documents(self, corpus: Corpus, entry_id: usize, first_index: usize) -> Vec<KnowledgeDocument> {
        let header = format!("問題: {}\n回答: ", self.question);
        let budget = MAX_CHUNK_CHARS
            .saturating_sub(header.chars().count())
            .max(MAX_CHUNK_CHARS / 2);

        chunk_text(&self.answer, budget, CHUNK_OVERLAP)
            .into_iter()
            .map(|chunk| KnowledgeDocument {
                text: format!("{}{}", header, chunk.text),
                source: self.source.clone(),
                corpus,
                entry_id,
                chunk_index: first_index + chunk.chunk_index,
            })
            .collect()
    }
}

fn str_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| value.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
}

/// Pairs each human turn with the next gpt/assistant turn.
fn medical_pairs(entry: &Value) -> Vec<QaPair> {
    let Some(turns) = entry.get("conversations").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut pairs = Vec::new();
    let mut question: Option<&str> = None;

    for turn in turns {
        let (Some(speaker), Some(content)) =
            (str_field(turn, &["from", "role"]), str_field(turn, &["value", "text"]))
        else {
            continue;
        };
        let speaker = speaker.to_lowercase();

        if speaker.contains("human") || speaker == "user" {
            question = Some(content);
        } else if speaker.contains("gpt") || speaker.contains("assistant") {
            if let Some(q) = question.take() {
                pairs.push(QaPair {
                    question: q.to_string(),
                    answer: content.to_string(),
                    source: MEDICALGPT_SOURCE.to_string(),
                });
            }
        }
    }

    pairs
}

fn dialogue_pair(entry: &Value) -> Option<QaPair> {
    let question = str_field(entry, &["question"])?;
    let answer = str_field(entry, &["answer"])?;
    let source = str_field(entry, &["source"]).unwrap_or("Unknown");

    Some(QaPair {
        question: question.to_string(),
        answer: answer.to_string(),
        source: format!("{}{}", TOYHOM_PREFIX, source),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn medical_conversations_pair_up() {
        let raw = r#"[
            {"conversations": [
                {"from": "human", "value": "血糖高怎麼辦?"},
                {"from": "gpt", "value": "控制飲食。"},
                {"role": "user", "text": "要吃藥嗎?"},
                {"role": "assistant", "text": "請諮詢醫師。"}
            ]},
            {"conversations": []},
            {"conversations": [{"from": "human", "value": "沒有回答"}]},
            {"other": 1}
        ]"#;
        let parsed = parse_corpus(Corpus::Medical, raw).unwrap();
        assert_eq!(parsed.entries, 4);
        assert_eq!(parsed.skipped, 3);
        assert_eq!(parsed.documents.len(), 2);
        assert_eq!(parsed.documents[0].text, "問題: 血糖高怎麼辦?\n回答: 控制飲食。");
        assert_eq!(parsed.documents[0].source, "medicalgpt");
        assert_eq!(parsed.documents[1].text, "問題: 要吃藥嗎?\n回答: 請諮詢醫師。");
        assert!(parsed.documents.iter().all(|d| d.entry_id == 0));
        assert_eq!(parsed.documents[1].chunk_index, 1);
    }

    #[test]
    fn dialogue_entries_carry_prefixed_source() {
        let raw = r#"[
            {"question": "頭痛", "answer": "多休息", "source": "內科"},
            {"question": "咳嗽", "answer": "多喝水"},
            {"question": "", "answer": "x"}
        ]"#;
        let parsed = parse_corpus(Corpus::Dialogue, raw).unwrap();
        assert_eq!(parsed.skipped, 1);
        assert_eq!(parsed.documents[0].source, "Toyhom_內科");
        assert_eq!(parsed.documents[1].source, "Toyhom_Unknown");
        assert_eq!(parsed.documents[1].entry_id, 1);
        assert_eq!(parsed.documents[1].corpus, Corpus::Dialogue);
    }

    #[test]
    fn long_answers_are_chunked_with_question_header() {
        let answer = "高血壓患者應減少鈉攝取並規律運動。".repeat(30);
        let raw = serde_json::json!([{ "question": "高血壓飲食", "answer": answer }]).to_string();
        let parsed = parse_corpus(Corpus::Dialogue, &raw).unwrap();
        assert!(parsed.documents.len() > 1);
        for (i, doc) in parsed.documents.iter().enumerate() {
            assert!(doc.text.starts_with("問題: 高血壓飲食\n回答: "));
            assert!(doc.text.chars().count() <= MAX_CHUNK_CHARS);
            assert_eq!(doc.chunk_index, i);
        }
    }

    #[test]
    fn non_array_is_an_error() {
        assert!(parse_corpus(Corpus::Medical, r#"{"conversations": []}"#).is_err());
    }
}
