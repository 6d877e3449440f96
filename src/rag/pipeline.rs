use std::sync::Arc;

use anyhow::Result;

use super::input::HealthInput;
use super::json_repair::{parse_insurer_analysis, parse_user_analysis};
use super::prompt::{
    analysis_prompt, insurer_report_prompt, interactive_prompt, user_report_prompt, SYSTEM_PROMPT,
};
use super::retrieval::{render_context, retrieve_for_input, retrieve_for_query, RetrievalSettings};
use super::terms::translate_text;
use super::KnowledgeBase;
use crate::llm::{LlmClient, LlmRequest};
use crate::models::{
    DiseaseRisk, HealthAnalysis, HealthCheckRecord, InsurerReportAnalysis, InteractiveResponse,
    UserReportAnalysis,
};
use crate::session::Session;

pub const NO_DATA_MESSAGE: &str = "未找到相關健康檢查數據，無法進行分析。";
pub const RETRIEVAL_FALLBACK: &str = "無法檢索相關醫療知識。";
pub const ANALYSIS_FALLBACK: &str = "無法進行健康數據分析，請稍後再試。";
pub const QUERY_FALLBACK: &str = "無法處理您的查詢，請稍後再試。";

/// Retrieval-augmented analysis over health data.
pub struct AnalysisPipeline {
    llm: Arc<dyn LlmClient>,
    knowledge: Option<KnowledgeBase>,
    settings: RetrievalSettings,
}

impl AnalysisPipeline {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        knowledge: Option<KnowledgeBase>,
        settings: RetrievalSettings,
    ) -> Self {
        Self {
            llm,
            knowledge,
            settings,
        }
    }

    pub fn has_knowledge(&self) -> bool {
        self.knowledge.is_some()
    }

    async fn context_for_input(&self, input: &HealthInput) -> String {
        let Some(kb) = &self.knowledge else {
            return RETRIEVAL_FALLBACK.to_string();
        };
        match retrieve_for_input(kb, self.llm.as_ref(), input, &self.settings).await {
            Ok(docs) => render_context(&docs),
            Err(e) => {
                tracing::error!("Knowledge retrieval failed: {}", e);
                RETRIEVAL_FALLBACK.to_string()
            }
        }
    }

    async fn context_for_query(&self, query: &str) -> String {
        let Some(kb) = &self.knowledge else {
            return RETRIEVAL_FALLBACK.to_string();
        };
        match retrieve_for_query(kb, self.llm.as_ref(), query, &self.settings).await {
            Ok(docs) => render_context(&docs),
            Err(e) => {
                tracing::error!("Knowledge retrieval failed for query: {}", e);
                RETRIEVAL_FALLBACK.to_string()
            }
        }
    }

    async fn generate(&self, request: LlmRequest) -> Result<String> {
        let request = request.with_system(SYSTEM_PROMPT);
        let text = self.llm.generate(&request).await?;
        Ok(translate_text(&text))
    }

    /// Analysis of stored records, newest first.
    pub async fn analyze_records(&self, records: Vec<HealthCheckRecord>) -> HealthAnalysis {
        if records.is_empty() {
            return HealthAnalysis {
                health_data: Vec::new(),
                analysis_result: NO_DATA_MESSAGE.to_string(),
                retrieved_context: String::new(),
            };
        }

        let input = HealthInput::Records(records.clone());
        let retrieved_context = self.context_for_input(&input).await;
        let prompt = analysis_prompt(&input.render(), &retrieved_context);

        let analysis_result = match self.generate(LlmRequest::text(prompt)).await {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("LLM analysis failed: {}", e);
                ANALYSIS_FALLBACK.to_string()
            }
        };

        HealthAnalysis {
            health_data: records,
            analysis_result,
            retrieved_context,
        }
    }

    /// Follow-up question inside an interactive session.
    pub async fn answer_query(&self, session: &Session, query: &str) -> InteractiveResponse {
        let retrieved_context = self.context_for_query(query).await;
        let prompt = interactive_prompt(
            &session.history_text(),
            &session.health_data,
            query,
            &retrieved_context,
        );

        let response = match self.generate(LlmRequest::text(prompt)).await {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("LLM query failed: {}", e);
                QUERY_FALLBACK.to_string()
            }
        };

        InteractiveResponse {
            query: query.to_string(),
            response,
            retrieved_context,
        }
    }

    pub async fn analyze_report_for_user(
        &self,
        report_id: &str,
        input: &HealthInput,
    ) -> Result<UserReportAnalysis> {
        let context = self.context_for_input(input).await;
        let raw = self
            .llm
            .generate(&LlmRequest::json(user_report_prompt(&input.render(), &context)).with_system(SYSTEM_PROMPT))
            .await?;

        let analysis = parse_user_analysis(report_id, &raw);
        Ok(UserReportAnalysis {
            summary: translate_text(&analysis.summary),
            advice: analysis.advice.iter().map(|a| translate_text(a)).collect(),
            recommended_policy: translate_text(&analysis.recommended_policy),
            ..analysis
        })
    }

    pub async fn analyze_report_for_insurer(
        &self,
        report_id: &str,
        input: &HealthInput,
    ) -> Result<InsurerReportAnalysis> {
        let context = self.context_for_input(input).await;
        let raw = self
            .llm
            .generate(&LlmRequest::json(insurer_report_prompt(&input.render(), &context)).with_system(SYSTEM_PROMPT))
            .await?;

        let analysis = parse_insurer_analysis(report_id, &raw);
        Ok(InsurerReportAnalysis {
            summary: translate_text(&analysis.summary),
            metrics: analysis
                .metrics
                .iter()
                .map(|(k, v)| (k.clone(), translate_text(v)))
                .collect(),
            policy_type: translate_text(&analysis.policy_type),
            risks: analysis
                .risks
                .iter()
                .map(|r| DiseaseRisk {
                    disease: translate_text(&r.disease),
                    impact: translate_text(&r.impact),
                    description: translate_text(&r.description),
                })
                .collect(),
            ..analysis
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedLlm;
    use crate::rag::testing::knowledge;
    use chrono::NaiveDate;

    fn record(text: &str) -> HealthCheckRecord {
        HealthCheckRecord {
            check_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            extracted_text: text.into(),
        }
    }

    fn no_hyde() -> RetrievalSettings {
        RetrievalSettings {
            enable_hyde: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn no_records_short_circuits() {
        let llm = Arc::new(ScriptedLlm::new(["unused"]));
        let pipeline = AnalysisPipeline::new(llm.clone(), None, no_hyde());
        let result = pipeline.analyze_records(Vec::new()).await;
        assert_eq!(result.analysis_result, NO_DATA_MESSAGE);
        assert!(result.health_data.is_empty());
        assert!(llm.prompts().is_empty());
    }

    #[tokio::test]
    async fn analysis_uses_context_and_translates() {
        let (kb, _) = knowledge(&[("低密度脂蛋白膽固醇過高應減少飽和脂肪", "medicalgpt")]);
        let llm = Arc::new(ScriptedLlm::new(["Your LDL-C is high, 請減少油炸食物。"]));
        let pipeline = AnalysisPipeline::new(llm.clone(), Some(kb), no_hyde());

        let result = pipeline.analyze_records(vec![record("LDL-C 165 mg/dL")]).await;
        assert_eq!(result.analysis_result, "Your 低密度脂蛋白膽固醇 is high, 請減少油炸食物。");
        assert!(result.retrieved_context.starts_with("【血脂】"));
        assert_eq!(result.health_data.len(), 1);

        let prompts = llm.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].prompt.contains("提取的文本: LDL-C 165 mg/dL"));
        assert!(prompts[0].prompt.contains("低密度脂蛋白膽固醇過高"));
        assert_eq!(prompts[0].system.as_deref(), Some(SYSTEM_PROMPT));
    }

    #[tokio::test]
    async fn missing_knowledge_base_uses_fallback_context() {
        let llm = Arc::new(ScriptedLlm::new(["ok"]));
        let pipeline = AnalysisPipeline::new(llm, None, no_hyde());
        let result = pipeline.analyze_records(vec![record("BP 120/80")]).await;
        assert_eq!(result.retrieved_context, RETRIEVAL_FALLBACK);
        assert_eq!(result.analysis_result, "ok");
    }

    #[tokio::test]
    async fn llm_failure_yields_fallback_message() {
        let llm = Arc::new(ScriptedLlm::failing());
        let pipeline = AnalysisPipeline::new(llm, None, no_hyde());
        let result = pipeline.analyze_records(vec![record("BP 120/80")]).await;
        assert_eq!(result.analysis_result, ANALYSIS_FALLBACK);
    }

    #[tokio::test]
    async fn query_includes_history_and_session_data() {
        let llm = Arc::new(ScriptedLlm::new(["建議三個月後複檢 HbA1c"]));
        let pipeline = AnalysisPipeline::new(llm.clone(), None, no_hyde());
        let mut session = Session::new("A123456789", "檢查日期: 2024-03-01\n提取的文本: HbA1c 6.2%");
        session.history.push_back(crate::session::Turn {
            query: "血糖正常嗎?".into(),
            response: "略高".into(),
        });

        let reply = pipeline.answer_query(&session, "多久要複檢?").await;
        assert_eq!(reply.query, "多久要複檢?");
        assert_eq!(reply.response, "建議三個月後複檢 糖化血色素");

        let prompt = &llm.prompts()[0].prompt;
        assert!(prompt.contains("提問: 血糖正常嗎?\n回答: 略高"));
        assert!(prompt.contains("HbA1c 6.2%"));
        assert!(prompt.contains("多久要複檢?"));
    }

    #[tokio::test]
    async fn query_llm_failure_yields_fallback() {
        let pipeline = AnalysisPipeline::new(Arc::new(ScriptedLlm::failing()), None, no_hyde());
        let reply = pipeline.answer_query(&Session::new("s", "d"), "q").await;
        assert_eq!(reply.response, QUERY_FALLBACK);
    }

    #[tokio::test]
    async fn user_report_is_parsed_and_translated() {
        let llm = Arc::new(ScriptedLlm::new([
            "```json\n{\"summary\": \"Glu-AC 正常\", \"advice\": [\"維持運動\"], \"recommended_policy\": \"standard health insurance plan\"}\n```",
        ]));
        let pipeline = AnalysisPipeline::new(llm.clone(), None, no_hyde());
        let input = HealthInput::from_test_results_json(r#"{"Glu-AC": "89 mg/dL"}"#).unwrap();

        let analysis = pipeline.analyze_report_for_user("report001", &input).await.unwrap();
        assert_eq!(analysis.report_id, "report001");
        assert_eq!(analysis.summary, "空腹血糖 正常");
        assert_eq!(analysis.advice, vec!["維持運動"]);
        assert_eq!(analysis.recommended_policy, "標準健康保單");
        assert!(llm.prompts()[0].json_format);
    }

    #[tokio::test]
    async fn insurer_report_is_parsed_and_translated() {
        let llm = Arc::new(ScriptedLlm::new([
            r#"{"summary": "low risk", "metrics": {"LDL-C": "128 mg/dL"}, "policy_type": "standard health insurance plan", "risks": [{"disease": "hyperlipidemia", "impact": "low risk", "description": "LDL-C 略高"}]}"#,
        ]));
        let pipeline = AnalysisPipeline::new(llm, None, no_hyde());
        let input = HealthInput::from_test_results_json(r#"{"LDL-C": "128 mg/dL"}"#).unwrap();

        let analysis = pipeline.analyze_report_for_insurer("r9", &input).await.unwrap();
        assert_eq!(analysis.summary, "低風險");
        assert_eq!(analysis.metrics["LDL-C"], "128 mg/dL");
        assert_eq!(analysis.policy_type, "標準健康保單");
        assert_eq!(analysis.risks[0].disease, "高血脂");
        assert_eq!(analysis.risks[0].description, "低密度脂蛋白膽固醇 略高");
    }

    #[tokio::test]
    async fn report_llm_failure_is_an_error() {
        let pipeline = AnalysisPipeline::new(Arc::new(ScriptedLlm::failing()), None, no_hyde());
        let input = HealthInput::from_test_results_json(r#"{"BP": "120/80"}"#).unwrap();
        assert!(pipeline.analyze_report_for_user("r", &input).await.is_err());
    }
}
