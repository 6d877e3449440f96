use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use super::AppState;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::models::{AnalyzeReportRequest, InsurerReportAnalysis, Role, UserReportAnalysis};
use crate::rag::input::HealthInput;

const ANALYSIS_UNAVAILABLE: &str = "報告分析服務暫時無法使用，請稍後再試";

fn report_input(request: &AnalyzeReportRequest) -> Result<HealthInput, ApiError> {
    if request.report_id.trim().is_empty() {
        return Err(ApiError::BadRequest("請提供 report_id".to_string()));
    }
    let input = HealthInput::from_test_results_json(&request.test_results_json)
        .map_err(ApiError::BadRequest)?;
    if input.is_empty() {
        return Err(ApiError::BadRequest("test_results_json 沒有任何檢驗項目".to_string()));
    }
    Ok(input)
}

pub async fn analyze_for_user(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(request): Json<AnalyzeReportRequest>,
) -> Result<Json<UserReportAnalysis>, ApiError> {
    let input = report_input(&request)?;
    tracing::info!(
        "User report analysis {} (patient {}) requested by {}",
        request.report_id,
        request.patient_hash,
        auth.id_number
    );

    state
        .pipeline
        .analyze_report_for_user(&request.report_id, &input)
        .await
        .map(Json)
        .map_err(|e| {
            tracing::error!("User report analysis {} failed: {}", request.report_id, e);
            ApiError::Unavailable(ANALYSIS_UNAVAILABLE.to_string())
        })
}

pub async fn analyze_for_insurer(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(request): Json<AnalyzeReportRequest>,
) -> Result<Json<InsurerReportAnalysis>, ApiError> {
    auth.require_role(
        &[Role::Other, Role::HealthCenter],
        "權限不足，此端點僅限 other 和 health_center 角色",
    )?;
    let input = report_input(&request)?;
    tracing::info!(
        "Insurer report analysis {} (patient {}) requested by {}",
        request.report_id,
        request.patient_hash,
        auth.id_number
    );

    state
        .pipeline
        .analyze_report_for_insurer(&request.report_id, &input)
        .await
        .map(Json)
        .map_err(|e| {
            tracing::error!("Insurer report analysis {} failed: {}", request.report_id, e);
            ApiError::Unavailable(ANALYSIS_UNAVAILABLE.to_string())
        })
}
