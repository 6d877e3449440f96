//! Pulling structured answers out of free-form model output.
//!
//! Local models wrap JSON in prose or code fences, use full-width
//! punctuation, leave trailing commas, or stop mid-object. The chain here is
//! extract → parse → repair and parse → regex field extraction → raw text.

use std::collections::BTreeMap;

use regex::Regex;
use serde_json::Value;

use crate::models::{DiseaseRisk, InsurerReportAnalysis, UserReportAnalysis};

/// The JSON object inside a response: a fenced block if present, else the
/// outermost `{...}`. An object that never closes runs to the end of text.
pub fn extract_json_block(text: &str) -> Option<&str> {
    let fenced = text
        .find("```json")
        .map(|i| i + 7)
        .or_else(|| text.find("```").map(|i| i + 3));

    if let Some(start) = fenced {
        let body = &text[start..];
        let body = match body.find("```") {
            Some(end) => &body[..end],
            None => body,
        };
        if let Some(block) = outermost_object(body) {
            return Some(block);
        }
    }
    outermost_object(text)
}

fn outermost_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    match text.rfind('}') {
        Some(end) if end > start => Some(&text[start..=end]),
        _ => Some(text[start..].trim_end()),
    }
}

fn is_closing(c: char) -> bool {
    matches!(c, '}' | ']' | '｝' | '］')
}

/// Rewrites almost-JSON into JSON.
///
/// Outside strings: full-width punctuation, smart and single quotes,
/// comments, trailing commas and Python literals are normalized. Inside
/// strings: raw newlines are escaped. Unterminated strings and structures
/// are closed at the end.
pub fn repair_json(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 8);
    let mut stack: Vec<char> = Vec::new();
    // closers of the string currently open
    let mut string_closers: Option<&'static [char]> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if let Some(closers) = string_closers {
            match c {
                // \' is not a JSON escape
                '\\' if chars.get(i + 1) == Some(&'\'') => {
                    out.push('\'');
                    i += 1;
                }
                '\\' => {
                    out.push('\\');
                    if let Some(&next) = chars.get(i + 1) {
                        out.push(next);
                        i += 1;
                    } else {
                        out.push('\\');
                    }
                }
                _ if closers.contains(&c) => {
                    out.push('"');
                    string_closers = None;
                }
                '"' => out.push_str("\\\""),
                '\n' => out.push_str("\\n"),
                '\r' => {}
                '\t' => out.push_str("\\t"),
                _ => out.push(c),
            }
            i += 1;
            continue;
        }

        match c {
            '"' => {
                out.push('"');
                string_closers = Some(&['"']);
            }
            '“' | '”' => {
                out.push('"');
                string_closers = Some(&['”', '“']);
            }
            '\'' => {
                out.push('"');
                string_closers = Some(&['\'']);
            }
            '‘' | '’' => {
                out.push('"');
                string_closers = Some(&['’', '‘']);
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 2;
                continue;
            }
            ',' | '，' => {
                let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                if !matches!(next, Some(&n) if is_closing(n)) {
                    out.push(',');
                }
            }
            '：' => out.push(':'),
            '{' | '｛' => {
                stack.push('}');
                out.push('{');
            }
            '[' | '［' => {
                stack.push(']');
                out.push('[');
            }
            '}' | '｝' | ']' | '］' => {
                let closer = if matches!(c, '}' | '｝') { '}' } else { ']' };
                if stack.last() == Some(&closer) {
                    stack.pop();
                }
                out.push(closer);
            }
            _ if c.is_ascii_alphabetic() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_alphanumeric() {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                out.push_str(match word.as_str() {
                    "True" => "true",
                    "False" => "false",
                    "None" => "null",
                    other => other,
                });
                continue;
            }
            _ => out.push(c),
        }
        i += 1;
    }

    if string_closers.is_some() {
        out.push('"');
    }
    while let Some(closer) = stack.pop() {
        let trimmed = out.trim_end().len();
        out.truncate(trimmed);
        if out.ends_with(',') {
            out.pop();
        }
        if out.ends_with(':') {
            out.push_str(" null");
        }
        out.push(closer);
    }

    out
}

/// Best-effort JSON object from model output.
pub fn parse_json_lenient(text: &str) -> Option<Value> {
    let block = extract_json_block(text)?;
    let value = serde_json::from_str::<Value>(block)
        .ok()
        .or_else(|| serde_json::from_str::<Value>(&repair_json(block)).ok())?;
    value.is_object().then_some(value)
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        Value::Array(items) => items
            .iter()
            .map(value_to_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("；"),
        Value::Object(_) | Value::Bool(_) | Value::Number(_) => value.to_string(),
    }
}

/// Advice may come back as a list or as one bulleted string.
fn value_to_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(value_to_text)
            .filter(|s| !s.is_empty())
            .collect(),
        Value::String(s) => split_bullets(s),
        Value::Null => Vec::new(),
        other => vec![value_to_text(other)],
    }
}

fn split_bullets(text: &str) -> Vec<String> {
    static BULLET: once_cell::sync::Lazy<Regex> =
        once_cell::sync::Lazy::new(|| Regex::new(r"^\s*(?:[-*•]|\d+[.)、])\s*").unwrap());
    text.lines()
        .map(|line| BULLET.replace(line, "").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

/// First present key among `keys`.
fn field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| value.get(*k))
}

fn unescape(raw: &str) -> String {
    raw.replace("\\n", "\n")
        .replace("\\\"", "\"")
        .replace("\\t", "\t")
        .replace("\\\\", "\\")
        .trim()
        .to_string()
}

/// `"name": "value"` anywhere in the text, tolerating smart quotes and `：`.
pub fn string_field(text: &str, name: &str) -> Option<String> {
    let pattern = format!(
        r#"["“']?{}["”']?\s*[:：]\s*["“']((?:[^"”\\]|\\.)*)["”']"#,
        regex::escape(name)
    );
    let re = Regex::new(&pattern).ok()?;
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| unescape(m.as_str()))
        .filter(|s| !s.is_empty())
}

/// `"name": ["a", "b"]` anywhere in the text.
pub fn list_field(text: &str, name: &str) -> Vec<String> {
    static ITEM: once_cell::sync::Lazy<Regex> =
        once_cell::sync::Lazy::new(|| Regex::new(r#"["“]((?:[^"”\\]|\\.)*)["”]"#).unwrap());

    let pattern = format!(r#"(?s)["“']?{}["”']?\s*[:：]\s*[\[［](.*?)[\]］]"#, regex::escape(name));
    let Ok(re) = Regex::new(&pattern) else {
        return Vec::new();
    };
    let Some(body) = re.captures(text).and_then(|c| c.get(1)) else {
        return Vec::new();
    };
    ITEM.captures_iter(body.as_str())
        .filter_map(|c| c.get(1))
        .map(|m| unescape(m.as_str()))
        .filter(|s| !s.is_empty())
        .collect()
}

fn is_empty_user(a: &UserReportAnalysis) -> bool {
    a.summary.is_empty() && a.advice.is_empty() && a.recommended_policy.is_empty()
}

fn is_empty_insurer(a: &InsurerReportAnalysis) -> bool {
    a.summary.is_empty() && a.metrics.is_empty() && a.policy_type.is_empty() && a.risks.is_empty()
}

pub fn parse_user_analysis(report_id: &str, raw: &str) -> UserReportAnalysis {
    if let Some(value) = parse_json_lenient(raw) {
        let analysis = UserReportAnalysis {
            report_id: report_id.to_string(),
            summary: field(&value, &["summary", "總結"]).map(value_to_text).unwrap_or_default(),
            advice: field(&value, &["advice", "建議"]).map(value_to_list).unwrap_or_default(),
            recommended_policy: field(&value, &["recommended_policy", "推薦保單"])
                .map(value_to_text)
                .unwrap_or_default(),
        };
        if !is_empty_user(&analysis) {
            return analysis;
        }
        tracing::warn!("Report {}: JSON has none of the expected keys", report_id);
    } else {
        tracing::warn!("Report {}: model output is not JSON, extracting fields", report_id);
    }

    let mut advice = list_field(raw, "advice");
    if advice.is_empty() {
        advice = string_field(raw, "advice").map(|s| split_bullets(&s)).unwrap_or_default();
    }
    let analysis = UserReportAnalysis {
        report_id: report_id.to_string(),
        summary: string_field(raw, "summary").unwrap_or_default(),
        advice,
        recommended_policy: string_field(raw, "recommended_policy").unwrap_or_default(),
    };

    if is_empty_user(&analysis) {
        return UserReportAnalysis {
            summary: raw.trim().to_string(),
            ..analysis
        };
    }
    analysis
}

fn metrics_from(value: &Value) -> BTreeMap<String, String> {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| (k.trim().to_string(), value_to_text(v)))
            .collect(),
        // [{"name": "...", "value": "..."}]
        Value::Array(items) => items
            .iter()
            .filter_map(|item| {
                let name = field(item, &["name", "metric", "指標"]).map(value_to_text)?;
                let value = field(item, &["value", "數值"]).map(value_to_text).unwrap_or_default();
                (!name.is_empty()).then_some((name, value))
            })
            .collect(),
        _ => BTreeMap::new(),
    }
}

fn risks_from(value: &Value) -> Vec<DiseaseRisk> {
    let Value::Array(items) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::Object(_) => {
                let text = |keys: &[&str]| field(item, keys).map(value_to_text).unwrap_or_default();
                let risk = DiseaseRisk {
                    disease: text(&["disease", "疾病"]),
                    impact: text(&["impact", "影響"]),
                    description: text(&["description", "描述", "說明"]),
                };
                (!risk.disease.is_empty()).then_some(risk)
            }
            Value::String(s) if !s.trim().is_empty() => Some(DiseaseRisk {
                disease: s.trim().to_string(),
                ..Default::default()
            }),
            _ => None,
        })
        .collect()
}

pub fn parse_insurer_analysis(report_id: &str, raw: &str) -> InsurerReportAnalysis {
    if let Some(value) = parse_json_lenient(raw) {
        let analysis = InsurerReportAnalysis {
            report_id: report_id.to_string(),
            summary: field(&value, &["summary", "總結"]).map(value_to_text).unwrap_or_default(),
            metrics: field(&value, &["metrics", "指標"]).map(metrics_from).unwrap_or_default(),
            policy_type: field(&value, &["policy_type", "保單類型"])
                .map(value_to_text)
                .unwrap_or_default(),
            risks: field(&value, &["risks", "風險"]).map(risks_from).unwrap_or_default(),
        };
        if !is_empty_insurer(&analysis) {
            return analysis;
        }
        tracing::warn!("Report {}: JSON has none of the expected keys", report_id);
    } else {
        tracing::warn!("Report {}: model output is not JSON, extracting fields", report_id);
    }

    let analysis = InsurerReportAnalysis {
        report_id: report_id.to_string(),
        summary: string_field(raw, "summary").unwrap_or_default(),
        metrics: BTreeMap::new(),
        policy_type: string_field(raw, "policy_type").unwrap_or_default(),
        risks: list_field(raw, "risks")
            .into_iter()
            .map(|disease| DiseaseRisk {
                disease,
                ..Default::default()
            })
            .collect(),
    };

    if is_empty_insurer(&analysis) {
        return InsurerReportAnalysis {
            summary: raw.trim().to_string(),
            ..analysis
        };
    }
    analysis
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_fenced_block() {
        let text = "以下是分析:\n```json\n{\"summary\": \"ok\"}\n```\n其他說明";
        assert_eq!(extract_json_block(text), Some("{\"summary\": \"ok\"}"));
    }

    #[test]
    fn extracts_outermost_object() {
        let text = "Sure! {\"a\": {\"b\": 1}} hope this helps";
        assert_eq!(extract_json_block(text), Some("{\"a\": {\"b\": 1}}"));
        assert_eq!(extract_json_block("no json here"), None);
    }

    #[test]
    fn repairs_common_damage() {
        let broken = "{'summary': '血糖正常'，“advice”： [\"多運動\", \"少糖\",], // note\n \"ok\": True,}";
        let value: Value = serde_json::from_str(&repair_json(broken)).unwrap();
        assert_eq!(
            value,
            json!({"summary": "血糖正常", "advice": ["多運動", "少糖"], "ok": true})
        );
    }

    #[test]
    fn closes_truncated_output() {
        let value: Value =
            serde_json::from_str(&repair_json("{\"summary\": \"血脂偏高\", \"advice\": [\"減少油炸")).unwrap();
        assert_eq!(value, json!({"summary": "血脂偏高", "advice": ["減少油炸"]}));

        let value: Value = serde_json::from_str(&repair_json("{\"summary\": \"x\", \"policy\":")).unwrap();
        assert_eq!(value, json!({"summary": "x", "policy": null}));
    }

    #[test]
    fn keeps_fullwidth_punctuation_inside_strings() {
        let value: Value = serde_json::from_str(&repair_json("{\"summary\": \"血壓，略高：需追蹤\",}")).unwrap();
        assert_eq!(value["summary"], "血壓，略高：需追蹤");
    }

    #[test]
    fn escapes_raw_newlines_in_strings() {
        let value = parse_json_lenient("{\"summary\": \"第一行\n第二行\"}").unwrap();
        assert_eq!(value["summary"], "第一行\n第二行");
    }

    #[test]
    fn user_analysis_from_clean_json() {
        let raw = r#"```json
{"summary": "整體良好", "advice": ["規律運動", "定期追蹤"], "recommended_policy": "standard health insurance plan"}
```"#;
        let analysis = parse_user_analysis("r1", raw);
        assert_eq!(analysis.report_id, "r1");
        assert_eq!(analysis.summary, "整體良好");
        assert_eq!(analysis.advice, vec!["規律運動", "定期追蹤"]);
        assert_eq!(analysis.recommended_policy, "standard health insurance plan");
    }

    #[test]
    fn user_advice_as_bulleted_string() {
        let raw = r#"{"summary": "s", "advice": "1. 多喝水\n2. 少熬夜\n- 規律運動", "recommended_policy": ""}"#;
        let analysis = parse_user_analysis("r1", raw);
        assert_eq!(analysis.advice, vec!["多喝水", "少熬夜", "規律運動"]);
    }

    #[test]
    fn user_analysis_regex_fallback() {
        let raw = r#"summary: "血糖偏高" and then advice: ["控制飲食", "運動"] oops { broken"#;
        let analysis = parse_user_analysis("r2", raw);
        assert_eq!(analysis.summary, "血糖偏高");
        assert_eq!(analysis.advice, vec!["控制飲食", "運動"]);
    }

    #[test]
    fn user_analysis_raw_text_fallback() {
        let analysis = parse_user_analysis("r3", "  您的檢查結果大致正常。 ");
        assert_eq!(analysis.summary, "您的檢查結果大致正常。");
        assert!(analysis.advice.is_empty());
    }

    #[test]
    fn insurer_analysis_with_mixed_metric_types() {
        let raw = r#"{"summary": "中度風險", "metrics": {"LDL-C": 128, "BP": "127/61 mmHg", "flag": true},
            "policy_type": "高風險健康保單",
            "risks": [{"disease": "心血管疾病", "impact": "中", "description": "LDL-C 偏高"}, "糖尿病", {"impact": "x"}]}"#;
        let analysis = parse_insurer_analysis("r4", raw);
        assert_eq!(analysis.metrics["LDL-C"], "128");
        assert_eq!(analysis.metrics["flag"], "true");
        assert_eq!(analysis.policy_type, "高風險健康保單");
        assert_eq!(analysis.risks.len(), 2);
        assert_eq!(analysis.risks[0].impact, "中");
        assert_eq!(analysis.risks[1].disease, "糖尿病");
    }

    #[test]
    fn insurer_metrics_as_list() {
        let raw = r#"{"summary": "s", "metrics": [{"name": "HbA1c", "value": "4.1 %"}], "policy_type": "p", "risks": []}"#;
        let analysis = parse_insurer_analysis("r5", raw);
        assert_eq!(analysis.metrics.get("HbA1c").map(String::as_str), Some("4.1 %"));
    }

    #[test]
    fn escaped_single_quote_becomes_plain_quote() {
        let value: Value = serde_json::from_str(&repair_json(r"{'summary': 'don\'t worry',}")).unwrap();
        assert_eq!(value["summary"], "don't worry");

        let analysis = parse_user_analysis("r6", r"{'summary': 'don\'t worry',}");
        assert_eq!(analysis.summary, "don't worry");
    }

    #[test]
    fn unknown_keys_fall_back_to_raw_text() {
        let raw = r#"{"analysis": "空腹血糖偏高，建議控制飲食", "suggestions": ["少糖"]}"#;

        let user = parse_user_analysis("r7", raw);
        assert!(user.summary.contains("空腹血糖偏高"));
        assert!(user.advice.is_empty());

        let insurer = parse_insurer_analysis("r7", raw);
        assert!(insurer.summary.contains("空腹血糖偏高"));
        assert_eq!(insurer.report_id, "r7");
    }
}
