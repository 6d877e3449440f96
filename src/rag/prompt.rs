//! Prompt templates. All answers are requested in Traditional Chinese.

pub const SYSTEM_PROMPT: &str =
    "你是一位醫療助理，專門為台灣用戶提供服務。請始終使用繁體中文回答，並確保回答專業且易於理解。";

const PREAMBLE: &str = "你是一位專業的醫療助理，專門為台灣用戶提供服務。請使用繁體中文回答，並確保建議專業且易於理解。即使檢索到的醫療知識或健康數據可能包含英文或其他語言，你必須將回答轉換為繁體中文。";

const NO_CONTEXT: &str = "（無可用的醫療知識）";

fn context_or_placeholder(context: &str) -> &str {
    if context.trim().is_empty() {
        NO_CONTEXT
    } else {
        context
    }
}

pub fn analysis_prompt(health_data: &str, context: &str) -> String {
    format!(
        "{PREAMBLE}

### 健康檢查數據
{health_data}

### 相關醫療知識
{context}

### 分析與建議
請分析上述健康檢查數據，並結合醫療知識，提供具體的健康建議。如果數據不足以進行分析，請說明需要哪些額外的資訊。回答必須使用繁體中文。",
        context = context_or_placeholder(context),
    )
}

pub fn interactive_prompt(history: &str, health_data: &str, query: &str, context: &str) -> String {
    let history = if history.trim().is_empty() {
        "（尚無對話紀錄）"
    } else {
        history
    };
    format!(
        "{PREAMBLE}

### 對話紀錄
{history}

### 健康檢查數據
{health_data}

### 用戶查詢
{query}

### 相關醫療知識
{context}

### 回答
請根據用戶的查詢、健康檢查數據和醫療知識，提供具體的回答。如果無法回答，請說明原因並建議如何獲取更多資訊。回答必須使用繁體中文。",
        context = context_or_placeholder(context),
    )
}

/// Asks for a passage that reads like a knowledge-base entry, so its
/// embedding lands near relevant documents.
pub fn hyde_prompt(subject: &str) -> String {
    format!(
        "請根據以下健康資訊，撰寫一段約 150 字的醫學知識說明，內容如同醫學衛教資料，\
說明相關檢查指標的意義、可能的異常原因與常見建議。只輸出說明本文，使用繁體中文。

### 健康資訊
{subject}

### 醫學知識說明"
    )
}

pub fn user_report_prompt(health_data: &str, context: &str) -> String {
    format!(
        "{PREAMBLE}

### 檢驗結果
{health_data}

### 相關醫療知識
{context}

### 任務
請為受檢者本人解讀上述檢驗結果，並只輸出一個 JSON 物件，不要輸出其他文字，格式如下：
{{\"summary\": \"整體健康狀況摘要\", \"advice\": [\"具體建議1\", \"具體建議2\"], \"recommended_policy\": \"建議的保單類型，例如 標準健康保單 或 高風險健康保單\"}}",
        context = context_or_placeholder(context),
    )
}

pub fn insurer_report_prompt(health_data: &str, context: &str) -> String {
    format!(
        "{PREAMBLE}

### 檢驗結果
{health_data}

### 相關醫療知識
{context}

### 任務
請以保險核保人員的角度評估上述檢驗結果，並只輸出一個 JSON 物件，不要輸出其他文字，格式如下：
{{\"summary\": \"風險評估摘要\", \"metrics\": {{\"指標名稱\": \"數值與判讀\"}}, \"policy_type\": \"建議的保單類型\", \"risks\": [{{\"disease\": \"疾病名稱\", \"impact\": \"低/中/高\", \"description\": \"風險說明\"}}]}}",
        context = context_or_placeholder(context),
    )
}
