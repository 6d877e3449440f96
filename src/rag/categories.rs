use super::input::HealthInput;
use super::terms::display_name;

pub struct Category {
    pub name: &'static str,
    /// Lab codes as they appear in structured results.
    pub codes: &'static [&'static str],
    /// Extra words that mark the category in free text.
    pub keywords: &'static [&'static str],
}

pub const CATEGORIES: &[Category] = &[
    Category {
        name: "血糖",
        codes: &["Glu-AC", "Glu-PC", "HbA1c"],
        keywords: &["血糖", "糖化血色素", "glucose"],
    },
    Category {
        name: "肝功能",
        codes: &["AST（GOT）", "ALT（GPT）", "AST", "ALT", "GOT", "GPT", "ALP", "T-Bil", "D-Bil", "Alb", "TP"],
        keywords: &["肝功能", "轉胺酶", "膽紅素"],
    },
    Category {
        name: "腎功能",
        codes: &["UN", "BUN", "CRE", "eGFR", "U.A"],
        keywords: &["腎功能", "肌酸酐", "尿素氮", "尿酸"],
    },
    Category {
        name: "血脂",
        codes: &["T-CHO", "LDL-C", "HDL-C", "TG"],
        keywords: &["血脂", "膽固醇", "三酸甘油酯"],
    },
    Category {
        name: "血液常規",
        codes: &["Hb", "Hct", "PLT", "WBC", "RBC", "MCV", "MCH", "MCHC", "RDW-CV"],
        keywords: &["血紅素", "白血球", "紅血球", "血小板"],
    },
    Category {
        name: "發炎指標",
        codes: &["hsCRP", "CRP", "ESR"],
        keywords: &["C反應蛋白", "發炎", "沉降速率"],
    },
    Category {
        name: "凝血功能",
        codes: &["PT", "aPTT"],
        keywords: &["凝血"],
    },
    Category {
        name: "腫瘤標記",
        codes: &["AFP", "CEA", "CA-125", "CA19-9", "PSA"],
        keywords: &["腫瘤標記", "癌胚抗原", "胎兒蛋白"],
    },
    Category {
        name: "尿液檢查",
        codes: &[
            "Specific Gravity",
            "PH",
            "Protein (Dipstick)",
            "Glucose (Dipstick)",
            "Bilirubin (Dipstick)",
            "Urobilinogen (Dipstick)",
            "Albumin (Dipstick)",
            "Creatinine (Dipstick)",
            "Alb/CRE Ratio",
            "RBC (Urine)",
            "WBC (Urine)",
            "WBC Esterase",
            "Epithelial Cells",
            "Casts",
            "Ketone",
            "Crystal",
            "Bacteria",
            "Nitrite",
            "Occult Blood",
        ],
        keywords: &["尿液", "尿蛋白", "尿糖", "潛血"],
    },
    Category {
        name: "血壓",
        codes: &["BP", "systolic blood pressure", "diastolic blood pressure"],
        keywords: &["血壓", "收縮壓", "舒張壓"],
    },
];

/// Length of the input prefix used when no category matches.
const GENERAL_QUERY_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryQuery {
    /// `None` for the general fallback query.
    pub category: Option<&'static str>,
    pub query: String,
}

impl CategoryQuery {
    pub fn label(&self) -> &str {
        self.category.unwrap_or("綜合")
    }
}

/// One query per category present in the input, in category order.
pub fn category_queries(input: &HealthInput) -> Vec<CategoryQuery> {
    let queries: Vec<CategoryQuery> = match input {
        HealthInput::Structured(entries) => CATEGORIES
            .iter()
            .filter_map(|cat| {
                let items: Vec<String> = entries
                    .iter()
                    .filter(|(code, _)| cat.codes.iter().any(|c| c.eq_ignore_ascii_case(code)))
                    .map(|(code, value)| format!("{} {}", display_name(code), value))
                    .collect();
                (!items.is_empty()).then(|| CategoryQuery {
                    category: Some(cat.name),
                    query: format!("{} 檢查結果: {}", cat.name, items.join(", ")),
                })
            })
            .collect(),
        HealthInput::Records(_) => {
            let text = input.render();
            CATEGORIES
                .iter()
                .filter_map(|cat| {
                    let found: Vec<String> = cat
                        .codes
                        .iter()
                        .filter(|code| mentions(&text, code))
                        .map(|code| display_name(code))
                        .chain(
                            cat.keywords
                                .iter()
                                .filter(|kw| mentions(&text, kw))
                                .map(|kw| kw.to_string()),
                        )
                        .collect();
                    (!found.is_empty()).then(|| CategoryQuery {
                        category: Some(cat.name),
                        query: format!("{} 相關指標: {}", cat.name, found.join(", ")),
                    })
                })
                .collect()
        }
    };

    if !queries.is_empty() {
        return queries;
    }

    let prefix: String = input.render().chars().take(GENERAL_QUERY_CHARS).collect();
    vec![CategoryQuery {
        category: None,
        query: format!("健康檢查 {}", prefix.trim()),
    }]
}

/// Case-insensitive containment; ASCII terms must not be part of a longer word.
fn mentions(text: &str, term: &str) -> bool {
    let hay = text.to_ascii_lowercase();
    let needle = term.to_ascii_lowercase();
    let word = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());

    let mut from = 0;
    while let Some(pos) = hay[from..].find(&needle) {
        let start = from + pos;
        let end = start + needle.len();
        let before = hay[..start].chars().next_back();
        let after = hay[end..].chars().next();
        let glued = (word(before) && word(needle.chars().next()))
            || (word(after) && word(needle.chars().next_back()));
        if !glued {
            return true;
        }
        from = start + needle.chars().next().map_or(1, char::len_utf8);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HealthCheckRecord;
    use chrono::NaiveDate;

    fn structured(pairs: &[(&str, &str)]) -> HealthInput {
        HealthInput::Structured(
            pairs
                .iter()
                .map(|(c, v)| (c.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn structured_input_groups_by_category() {
        let input = structured(&[
            ("LDL-C", "128 mg/dL"),
            ("Glu-AC", "89 mg/dL"),
            ("BP", "127/61 mmHg"),
            ("HbA1c", "4.1 %"),
        ]);
        let queries = category_queries(&input);
        let labels: Vec<&str> = queries.iter().map(|q| q.label()).collect();
        assert_eq!(labels, vec!["血糖", "血脂", "血壓"]);
        assert_eq!(
            queries[0].query,
            "血糖 檢查結果: 空腹血糖(Glu-AC) 89 mg/dL, 糖化血色素(HbA1c) 4.1 %"
        );
    }

    #[test]
    fn urine_codes_do_not_leak_into_blood_count() {
        let input = structured(&[("WBC (Urine)", "5 /HPF")]);
        let queries = category_queries(&input);
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].category, Some("尿液檢查"));
    }

    #[test]
    fn records_match_codes_and_keywords() {
        let input = HealthInput::Records(vec![HealthCheckRecord {
            check_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            extracted_text: "總膽固醇 210 mg/dL, ldl-c 150, 收縮壓 135".into(),
        }]);
        let queries = category_queries(&input);
        let labels: Vec<&str> = queries.iter().map(|q| q.label()).collect();
        assert_eq!(labels, vec!["血脂", "血壓"]);
        assert!(queries[0].query.contains("低密度脂蛋白膽固醇(LDL-C)"));
        assert!(queries[0].query.contains("膽固醇"));
    }

    #[test]
    fn unmatched_input_yields_general_query() {
        let input = structured(&[("Height", "170 cm")]);
        let queries = category_queries(&input);
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].category, None);
        assert_eq!(queries[0].label(), "綜合");
        assert_eq!(queries[0].query, "健康檢查 Height: 170 cm");
    }

    #[test]
    fn mentions_respects_word_boundaries() {
        assert!(mentions("PT 10.4 sec", "PT"));
        assert!(!mentions("PTSD", "PT"));
        assert!(mentions("aptt 27.8, PT 10", "PT"));
        assert!(mentions("檢查血壓", "血壓"));
    }
}
