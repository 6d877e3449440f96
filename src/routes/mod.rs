pub mod auth;
pub mod health_check;
pub mod reports;

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{NaiveDate, Utc};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::token::TokenService;
use crate::auth::validation::{parse_date, validate_id_number};
use crate::auth::{AuthUser, TokenAuthority};
use crate::config::Settings;
use crate::db::Database;
use crate::error::ApiError;
use crate::llm::OllamaClient;
use crate::models::DateRangeQuery;
use crate::rag::pipeline::AnalysisPipeline;
use crate::session::SessionStore;

pub struct AppState {
    pub db: Database,
    pub pipeline: AnalysisPipeline,
    pub sessions: SessionStore,
    pub tokens: TokenService,
    pub settings: Settings,
    /// Checked by `/api/health`; absent in tests.
    pub ollama: Option<Arc<OllamaClient>>,
}

impl TokenAuthority for Arc<AppState> {
    fn token_service(&self) -> &TokenService {
        &self.tokens
    }
}

impl AppState {
    /// The token holder must still exist with the role the token claims.
    pub(crate) async fn ensure_caller(&self, auth: &AuthUser) -> Result<(), ApiError> {
        match self.db.find_user(&auth.id_number).await? {
            Some(user) if user.role == auth.role.as_str() => Ok(()),
            Some(user) => {
                tracing::warn!(
                    "Role mismatch for {}: token {}, stored {}",
                    auth.id_number,
                    auth.role,
                    user.role
                );
                Err(ApiError::InvalidCredentials(format!(
                    "角色不匹配：token 中的角色為 {}，但用戶角色為 {}",
                    auth.role, user.role
                )))
            }
            None => Err(ApiError::InvalidCredentials(format!(
                "用戶 {} 不存在",
                auth.id_number
            ))),
        }
    }

    pub(crate) async fn ensure_registered(&self, id_number: &str) -> Result<(), ApiError> {
        if self.db.id_number_exists(id_number).await? {
            Ok(())
        } else {
            Err(ApiError::NotFound("身分證字號不存在".to_string()))
        }
    }
}

pub(crate) fn check_id_number(id_number: &str) -> Result<(), ApiError> {
    validate_id_number(id_number)
        .map_err(|e| ApiError::BadRequest(format!("身分證字號格式不正確: {}", e)))
}

/// Parses the optional `start_date` / `end_date` query bounds.
pub(crate) fn date_range(
    query: &DateRangeQuery,
) -> Result<(Option<NaiveDate>, Option<NaiveDate>), ApiError> {
    fn bound(value: &Option<String>, name: &str) -> Result<Option<NaiveDate>, ApiError> {
        match value.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => parse_date(raw).map(Some).ok_or_else(|| {
                ApiError::BadRequest(format!("{}格式不正確，必須為 YYYY-MM-DD", name))
            }),
        }
    }

    let start = bound(&query.start_date, "開始日期")?;
    let end = bound(&query.end_date, "結束日期")?;
    if let (Some(s), Some(e)) = (start, end) {
        if s > e {
            return Err(ApiError::BadRequest("開始日期不能晚於結束日期".to_string()));
        }
    }
    Ok((start, end))
}

fn cors_layer(settings: &Settings) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::OPTIONS];
    match settings.allowed_origins() {
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(Any),
        Some(origins) => {
            let origins: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|o| match o.parse() {
                    Ok(v) => Some(v),
                    Err(_) => {
                        tracing::warn!("Ignoring invalid CORS origin: {}", o);
                        None
                    }
                })
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(methods)
                .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT])
                .allow_credentials(true)
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state.settings.max_upload_mb * 1024 * 1024;

    Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/forgot-password", post(auth::forgot_password))
        .route("/me", get(auth::me))
        .route("/health-check/upload/:id_number", post(health_check::upload))
        .route("/health-check/user/:id_number", get(health_check::user_records))
        .route("/health-check/other/interact", post(health_check::interact))
        .route("/health-check/other/:id_number", get(health_check::other_records))
        .route("/v1/reports/analyze/user", post(reports::analyze_for_user))
        .route("/v1/reports/analyze/insurer", post(reports::analyze_for_insurer))
        .route("/api/health", get(health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors_layer(&state.settings))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let ollama_healthy = match &state.ollama {
        Some(client) => client.health_check().await.unwrap_or(false),
        None => false,
    };

    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "services": {
            "ollama": ollama_healthy,
            "knowledge_base": state.pipeline.has_knowledge()
        }
    }))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::llm::testing::ScriptedLlm;
    use crate::models::Role;
    use crate::rag::KnowledgeBase;

    pub const REVIEWER_ID: &str = "A123456789";
    pub const PATIENT_ID: &str = "B234567894";

    fn build(db: Database, llm: Arc<ScriptedLlm>, knowledge: Option<KnowledgeBase>) -> Arc<AppState> {
        let settings =
            Settings::with_overrides(&[("max_upload_mb", "1"), ("bcrypt_cost", "4")]).unwrap();
        Arc::new(AppState {
            db,
            pipeline: AnalysisPipeline::new(llm, knowledge, settings.retrieval()),
            sessions: SessionStore::new(settings.session_ttl_minutes),
            tokens: TokenService::new("test-secret", 30),
            settings,
            ollama: None,
        })
    }

    /// State whose database is never reachable; only paths that reject
    /// before touching storage can be driven through it.
    pub fn state_with(llm: Arc<ScriptedLlm>, knowledge: Option<KnowledgeBase>) -> Arc<AppState> {
        let db = Database::connect_lazy("postgres://healthcheck@127.0.0.1:1/none").unwrap();
        build(db, llm, knowledge)
    }

    /// State backed by the scratch database from `db::testing::database`.
    pub async fn db_state(llm: Arc<ScriptedLlm>) -> Arc<AppState> {
        build(crate::db::testing::database().await, llm, None)
    }

    pub fn state() -> Arc<AppState> {
        state_with(Arc::new(ScriptedLlm::new(["ok"])), None)
    }

    pub fn bearer(state: &AppState, id_number: &str, role: Role) -> String {
        format!("Bearer {}", state.tokens.issue(id_number, role).unwrap())
    }

    pub async fn send(state: Arc<AppState>, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = router(state).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, body)
    }

    pub fn json_request(method: Method, uri: &str, token: Option<&str>, body: serde_json::Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, token);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    pub fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(Method::GET).uri(uri);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, token);
        }
        builder.body(Body::empty()).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn health_reports_missing_services() {
        let (status, body) = send(state(), get_request("/api/health", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["services"]["ollama"], false);
        assert_eq!(body["services"]["knowledge_base"], false);
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let (status, _) = send(state(), get_request("/nope", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn date_range_validation() {
        let query = DateRangeQuery {
            start_date: Some("2024-01-01".into()),
            end_date: Some("".into()),
        };
        assert_eq!(
            date_range(&query).unwrap(),
            (NaiveDate::from_ymd_opt(2024, 1, 1), None)
        );

        let bad = DateRangeQuery {
            start_date: Some("2024/01/01".into()),
            end_date: None,
        };
        assert!(matches!(date_range(&bad), Err(ApiError::BadRequest(_))));

        let reversed = DateRangeQuery {
            start_date: Some("2024-05-01".into()),
            end_date: Some("2024-01-01".into()),
        };
        assert!(matches!(date_range(&reversed), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn id_number_errors_are_bad_requests() {
        assert!(check_id_number(REVIEWER_ID).is_ok());
        assert!(matches!(check_id_number("a123"), Err(ApiError::BadRequest(_))));
    }
}
