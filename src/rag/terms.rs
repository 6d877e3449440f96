//! English lab codes and phrases → Traditional Chinese.

use once_cell::sync::Lazy;

/// (term, 繁體中文). Matching is ASCII case-insensitive.
const TERMS: &[(&str, &str)] = &[
    // 血糖
    ("Glu-AC", "空腹血糖"),
    ("Glu-PC", "飯後血糖"),
    ("HbA1c", "糖化血色素"),
    ("fasting blood glucose", "空腹血糖"),
    ("fasting glucose", "空腹血糖"),
    ("blood glucose", "血糖"),
    // 肝功能
    ("AST（GOT）", "天門冬胺酸轉胺酶"),
    ("ALT（GPT）", "丙胺酸轉胺酶"),
    ("AST", "天門冬胺酸轉胺酶"),
    ("GOT", "天門冬胺酸轉胺酶"),
    ("ALT", "丙胺酸轉胺酶"),
    ("GPT", "丙胺酸轉胺酶"),
    ("ALP", "鹼性磷酸酶"),
    ("T-Bil", "總膽紅素"),
    ("D-Bil", "直接膽紅素"),
    ("Alb", "白蛋白"),
    ("TP", "總蛋白"),
    // 腎功能
    ("UN", "尿素氮"),
    ("BUN", "血中尿素氮"),
    ("CRE", "肌酸酐"),
    ("eGFR", "腎絲球過濾率"),
    ("U.A", "尿酸"),
    ("uric acid", "尿酸"),
    // 血脂
    ("T-CHO", "總膽固醇"),
    ("LDL-C", "低密度脂蛋白膽固醇"),
    ("HDL-C", "高密度脂蛋白膽固醇"),
    ("TG", "三酸甘油酯"),
    ("total cholesterol", "總膽固醇"),
    ("triglycerides", "三酸甘油酯"),
    // 血液常規
    ("Hb", "血紅素"),
    ("Hct", "血球容積比"),
    ("PLT", "血小板"),
    ("WBC", "白血球"),
    ("RBC", "紅血球"),
    ("MCV", "平均紅血球體積"),
    ("MCH", "平均紅血球血紅素"),
    ("MCHC", "平均紅血球血紅素濃度"),
    ("RDW-CV", "紅血球分布寬度"),
    // 發炎指標
    ("hsCRP", "高敏感度C反應蛋白"),
    ("CRP", "C反應蛋白"),
    ("ESR", "紅血球沉降速率"),
    // 凝血功能
    ("PT", "凝血酶原時間"),
    ("aPTT", "活化部分凝血活酶時間"),
    // 腫瘤標記
    ("AFP", "甲型胎兒蛋白"),
    ("CEA", "癌胚抗原"),
    ("CA-125", "癌抗原125"),
    ("CA19-9", "癌抗原19-9"),
    ("PSA", "攝護腺特異抗原"),
    // 尿液檢查
    ("Specific Gravity", "尿比重"),
    ("PH", "酸鹼值"),
    ("Protein (Dipstick)", "尿蛋白(試紙)"),
    ("Glucose (Dipstick)", "尿糖(試紙)"),
    ("Bilirubin (Dipstick)", "尿膽紅素(試紙)"),
    ("Urobilinogen (Dipstick)", "尿膽素原(試紙)"),
    ("Albumin (Dipstick)", "尿白蛋白(試紙)"),
    ("Creatinine (Dipstick)", "尿肌酸酐(試紙)"),
    ("Alb/CRE Ratio", "尿白蛋白肌酸酐比值"),
    ("RBC (Urine)", "尿液紅血球"),
    ("WBC (Urine)", "尿液白血球"),
    ("WBC Esterase", "白血球酯酶"),
    ("Epithelial Cells", "上皮細胞"),
    ("Casts", "圓柱體"),
    ("Ketone", "酮體"),
    ("Crystal", "結晶"),
    ("Bacteria", "細菌"),
    ("Nitrite", "亞硝酸鹽"),
    ("Occult Blood", "潛血"),
    // 血壓
    ("BP", "血壓"),
    ("systolic blood pressure", "收縮壓"),
    ("diastolic blood pressure", "舒張壓"),
    ("blood pressure", "血壓"),
    ("hypertension", "高血壓"),
    ("diabetes", "糖尿病"),
    ("hyperlipidemia", "高血脂"),
    // 保單
    ("standard health insurance plan", "標準健康保單"),
    ("high risk health insurance plan", "高風險健康保單"),
    ("high-risk health insurance plan", "高風險健康保單"),
    ("low risk", "低風險"),
    ("medium risk", "中風險"),
    ("moderate risk", "中風險"),
    ("high risk", "高風險"),
];

/// Longest term first so `LDL-C` wins over shorter overlaps.
static SORTED: Lazy<Vec<(&'static str, &'static str)>> = Lazy::new(|| {
    let mut terms = TERMS.to_vec();
    terms.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.0.cmp(b.0)));
    terms
});

pub fn lookup(term: &str) -> Option<&'static str> {
    let term = term.trim();
    TERMS
        .iter()
        .find(|(en, _)| en.eq_ignore_ascii_case(term))
        .map(|(_, zh)| *zh)
}

/// `中文(code)` when the code is known, otherwise the code unchanged.
pub fn display_name(code: &str) -> String {
    match lookup(code) {
        Some(zh) => format!("{}({})", zh, code.trim()),
        None => code.trim().to_string(),
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
}

fn is_open_paren(c: char) -> bool {
    c == '(' || c == '（'
}

fn is_close_paren(c: char) -> bool {
    c == ')' || c == '）'
}

/// Replaces known terms with their Chinese names.
///
/// A term is only replaced when it does not sit inside a longer ASCII word,
/// and a term that is alone inside parentheses is kept as an annotation
/// (`空腹血糖(Glu-AC)` stays as it is).
pub fn translate_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev: Option<char> = None;
    let mut i = 0;

    'scan: while i < text.len() {
        let rest = &text[i..];

        for (en, zh) in SORTED.iter() {
            let Some(candidate) = rest.get(..en.len()) else {
                continue;
            };
            if !candidate.eq_ignore_ascii_case(en) {
                continue;
            }

            let next = rest[en.len()..].chars().next();
            let first = en.chars().next();
            let last = en.chars().last();
            let glued_before = matches!((prev, first), (Some(p), Some(f)) if is_word_char(p) && is_word_char(f));
            let glued_after = matches!((next, last), (Some(n), Some(l)) if is_word_char(n) && is_word_char(l));
            if glued_before || glued_after {
                continue;
            }

            let annotated = matches!((prev, next), (Some(p), Some(n)) if is_open_paren(p) && is_close_paren(n));
            if annotated {
                out.push_str(candidate);
            } else {
                out.push_str(zh);
            }
            prev = candidate.chars().last();
            i += en.len();
            continue 'scan;
        }

        let Some(c) = rest.chars().next() else {
            break;
        };
        out.push(c);
        prev = Some(c);
        i += c.len_utf8();
    }

    out
}
