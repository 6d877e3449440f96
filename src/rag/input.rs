use serde_json::Value;

use super::terms::display_name;
use crate::models::HealthCheckRecord;

/// What an analysis is run against.
#[derive(Debug, Clone, PartialEq)]
pub enum HealthInput {
    /// Lab code → value, as submitted with a report.
    Structured(Vec<(String, String)>),
    /// Stored health-check documents, newest first.
    Records(Vec<HealthCheckRecord>),
}

impl HealthInput {
    /// Parses a report's `test_results_json`, which must be a JSON object.
    pub fn from_test_results_json(raw: &str) -> Result<Self, String> {
        let value: Value = serde_json::from_str(raw.trim())
            .map_err(|e| format!("test_results_json 不是有效的 JSON: {}", e))?;
        let Value::Object(map) = value else {
            return Err("test_results_json 必須是 JSON 物件".to_string());
        };

        let entries = map
            .into_iter()
            .map(|(code, value)| {
                let value = match value {
                    Value::String(s) => s,
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                (code.trim().to_string(), value.trim().to_string())
            })
            .filter(|(code, _)| !code.is_empty())
            .collect();

        Ok(Self::Structured(entries))
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Structured(entries) => entries.is_empty(),
            Self::Records(records) => records.is_empty(),
        }
    }

    /// Prompt block for the health data.
    pub fn render(&self) -> String {
        match self {
            Self::Structured(entries) => entries
                .iter()
                .map(|(code, value)| format!("{}: {}", display_name(code), value))
                .collect::<Vec<_>>()
                .join("\n"),
            Self::Records(records) => records
                .iter()
                .map(|r| format!("檢查日期: {}\n提取的文本: {}", r.check_date, r.extracted_text))
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }
}
