use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{Local, NaiveDate};
use sha2::{Digest, Sha256};

use super::{check_id_number, date_range, AppState};
use crate::auth::validation::parse_date;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::indexer::extractor::{extract_text, DocumentFormat};
use crate::models::{
    DateRangeQuery, HealthAnalysis, InteractiveRequest, InteractiveResponse, NewHealthCheck, Role,
    UploadResponse,
};
use crate::rag::input::HealthInput;
use crate::session::{Session, Turn};

const REVIEWER_ONLY: &str = "權限不足，此端點僅限 other 和 health_center 角色";

struct UploadedFile {
    filename: String,
    format: DocumentFormat,
    bytes: Vec<u8>,
}

/// Reads the `file` and `check_date` parts of an upload.
async fn read_upload(
    multipart: &mut Multipart,
    max_upload_mb: usize,
) -> Result<(UploadedFile, Option<NaiveDate>), ApiError> {
    let multipart_error = |e: axum::extract::multipart::MultipartError| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(max_upload_mb)
        } else {
            ApiError::BadRequest(format!("無法讀取上傳內容: {}", e.body_text()))
        }
    };

    let mut file = None;
    let mut check_date = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let format = DocumentFormat::from_filename(&filename).ok_or_else(|| {
                    ApiError::BadRequest("不支援的文件格式，僅支援 PDF 和 DOCX".to_string())
                })?;
                let bytes = field.bytes().await.map_err(multipart_error)?;
                if bytes.len() > max_upload_mb * 1024 * 1024 {
                    return Err(ApiError::PayloadTooLarge(max_upload_mb));
                }
                file = Some(UploadedFile {
                    filename,
                    format,
                    bytes: bytes.to_vec(),
                });
            }
            "check_date" => {
                let raw = field.text().await.map_err(multipart_error)?;
                if !raw.trim().is_empty() {
                    let date = parse_date(&raw).ok_or_else(|| {
                        ApiError::BadRequest("檢查日期格式不正確，必須為 YYYY-MM-DD".to_string())
                    })?;
                    check_date = Some(date);
                }
            }
            _ => {}
        }
    }

    let file = file.ok_or_else(|| ApiError::BadRequest("請上傳健檢文件".to_string()))?;
    Ok((file, check_date))
}

pub async fn upload(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id_number): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    auth.require_role(&[Role::HealthCenter], "權限不足，僅健康中心可以上傳健檢資料")?;
    check_id_number(&id_number)?;

    let (file, check_date) = read_upload(&mut multipart, state.settings.max_upload_mb).await?;
    let check_date = check_date.unwrap_or_else(|| Local::now().date_naive());

    state.ensure_caller(&auth).await?;
    state.ensure_registered(&id_number).await?;

    let sha256 = hex::encode(Sha256::digest(&file.bytes));
    let format = file.format;
    let bytes = file.bytes;
    // pdf-extract can panic on malformed input; a failed task is a bad upload
    let extracted_text = tokio::task::spawn_blocking(move || extract_text(&bytes, format))
        .await
        .map_err(|e| {
            tracing::warn!("Text extraction task for {} aborted: {}", file.filename, e);
            ApiError::BadRequest(format!("無法提取 {} 文件內容", format.as_str()))
        })?
        .map_err(|e| ApiError::BadRequest(format!("無法提取 {} 文件內容：{}", format.as_str(), e)))?;

    if extracted_text.is_empty() {
        return Err(ApiError::BadRequest("文件內容為空".to_string()));
    }

    let data = serde_json::json!({
        "extracted_text": extracted_text,
        "source_filename": file.filename,
        "format": format.as_str(),
        "sha256": sha256,
    });
    state
        .db
        .insert_health_check(&NewHealthCheck {
            id_number: id_number.clone(),
            check_date,
            extracted_text,
            data,
        })
        .await?;

    tracing::info!(
        "{} uploaded {} for {} ({})",
        auth.id_number,
        file.filename,
        id_number,
        check_date
    );

    Ok(Json(UploadResponse {
        message: "健康檢查數據上傳成功".to_string(),
        check_date,
        sha256,
    }))
}

pub async fn user_records(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id_number): Path<String>,
    Query(range): Query<DateRangeQuery>,
) -> Result<Json<HealthAnalysis>, ApiError> {
    auth.require_role(&[Role::User], "權限不足，此端點僅限 user 角色")?;
    check_id_number(&id_number)?;
    if auth.id_number != id_number {
        return Err(ApiError::Forbidden("權限不足，只能查看自己的健檢資料".to_string()));
    }
    let (start, end) = date_range(&range)?;

    state.ensure_caller(&auth).await?;
    state.ensure_registered(&id_number).await?;

    let records = state.db.health_checks_for(&id_number, start, end).await?;
    Ok(Json(state.pipeline.analyze_records(records).await))
}

/// Reviewer view of someone's records. Also starts the caller's
/// interactive session over those records.
pub async fn other_records(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id_number): Path<String>,
    Query(range): Query<DateRangeQuery>,
) -> Result<Json<HealthAnalysis>, ApiError> {
    auth.require_role(&[Role::Other, Role::HealthCenter], REVIEWER_ONLY)?;
    check_id_number(&id_number)?;
    let (start, end) = date_range(&range)?;

    state.ensure_caller(&auth).await?;
    state.ensure_registered(&id_number).await?;

    let records = state.db.health_checks_for(&id_number, start, end).await?;
    let health_data = HealthInput::Records(records.clone()).render();
    let analysis = state.pipeline.analyze_records(records).await;

    state
        .sessions
        .open(&auth.id_number, Session::new(id_number, health_data))
        .await;

    Ok(Json(analysis))
}

pub async fn interact(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(request): Json<InteractiveRequest>,
) -> Result<Json<InteractiveResponse>, ApiError> {
    auth.require_role(&[Role::Other, Role::HealthCenter], REVIEWER_ONLY)?;

    let query = request.query.trim();
    if query.is_empty() {
        return Err(ApiError::BadRequest("請輸入問題".to_string()));
    }

    let session = state.sessions.get(&auth.id_number).await.ok_or_else(|| {
        ApiError::BadRequest("請先呼叫 /health-check/other/{id_number} 來初始化互動模式".to_string())
    })?;

    let response = state.pipeline.answer_query(&session, query).await;
    state
        .sessions
        .record_turn(
            &auth.id_number,
            Turn {
                query: response.query.clone(),
                response: response.response.clone(),
            },
        )
        .await;

    Ok(Json(response))
}
