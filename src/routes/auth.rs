use std::sync::Arc;

use axum::extract::State;
use axum::{Form, Json};

use super::{check_id_number, AppState};
use crate::auth::password::{generate_temporary_password, hash_password, verify_password};
use crate::auth::validation::{invalid_role_message, validate_email, validate_registration};
use crate::auth::AuthUser;
use crate::db::is_unique_violation;
use crate::error::ApiError;
use crate::models::{
    ForgotPasswordRequest, ForgotPasswordResponse, LoginForm, MessageResponse, NewUser,
    RegisterRequest, Role, TokenResponse, User,
};

const BAD_CREDENTIALS: &str = "身分證字號、密碼或角色錯誤";
const DUPLICATE_ID: &str = "身分證字號已存在";

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let valid = validate_registration(&request).map_err(ApiError::BadRequest)?;

    if state.db.id_number_exists(&request.id_number).await? {
        return Err(ApiError::Conflict(DUPLICATE_ID.to_string()));
    }

    let password_hash = hash_password(request.password, state.settings.bcrypt_cost).await?;
    state
        .db
        .insert_user(&NewUser {
            full_name: request.full_name,
            gender: request.gender,
            birth_date: valid.birth_date,
            id_number: request.id_number,
            password_hash,
            phone_number: request.phone_number,
            email: request.email,
            role: valid.role,
        })
        .await
        .map_err(|e| {
            // a concurrent registration can win between the check and the insert
            if is_unique_violation(&e) {
                ApiError::Conflict(DUPLICATE_ID.to_string())
            } else {
                ApiError::from(e)
            }
        })?;

    Ok(Json(MessageResponse::new("用戶註冊成功")))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Form(form): Form<LoginForm>,
) -> Result<Json<TokenResponse>, ApiError> {
    if form.username.is_empty() || form.password.is_empty() {
        return Err(ApiError::BadRequest("請提供用戶名和密碼".to_string()));
    }
    let role = form.requested_role().ok_or_else(|| {
        ApiError::BadRequest("未提供角色，請在 scopes 中指定 role，例如 role:user".to_string())
    })?;
    let role = Role::parse(role).ok_or_else(|| ApiError::BadRequest(invalid_role_message()))?;
    check_id_number(&form.username)?;

    let Some(user) = state.db.find_user(&form.username).await? else {
        tracing::info!("Login for unknown id {}", form.username);
        return Err(ApiError::InvalidCredentials(BAD_CREDENTIALS.to_string()));
    };
    if !verify_password(form.password, user.password).await? || user.role != role.as_str() {
        tracing::info!("Rejected login for {} as {}", form.username, role);
        return Err(ApiError::InvalidCredentials(BAD_CREDENTIALS.to_string()));
    }

    let access_token = state.tokens.issue(&user.id_number, role)?;
    tracing::info!("User {} logged in as {}", user.id_number, role);

    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer".to_string(),
    }))
}

pub async fn forgot_password(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ForgotPasswordRequest>,
) -> Result<Json<ForgotPasswordResponse>, ApiError> {
    check_id_number(&request.id_number)?;
    if !validate_email(&request.email) {
        return Err(ApiError::BadRequest("電子郵件格式不正確".to_string()));
    }
    if !state
        .db
        .verify_id_and_email(&request.id_number, &request.email)
        .await?
    {
        return Err(ApiError::NotFound("身分證字號與電子郵件不匹配".to_string()));
    }

    let temporary_password = generate_temporary_password();
    let password_hash = hash_password(temporary_password.clone(), state.settings.bcrypt_cost).await?;
    state
        .db
        .update_password(&request.id_number, &password_hash)
        .await?;

    Ok(Json(ForgotPasswordResponse {
        message: "密碼已重置，請檢查您的電子郵件（模擬）".to_string(),
        temporary_password,
    }))
}

pub async fn me(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<User>, ApiError> {
    state.ensure_caller(&auth).await?;
    state
        .db
        .find_user(&auth.id_number)
        .await?
        .map(Json)
        .ok_or(ApiError::Unauthorized)
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use crate::auth::validation::random_id_number;
    use crate::db::testing::purge;
    use crate::llm::testing::ScriptedLlm;
    use axum::body::Body;
    use axum::http::header::CONTENT_TYPE;
    use axum::http::{Method, Request, StatusCode};
    use serde_json::json;

    fn login_request(form: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/login")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn register_rejects_invalid_fields_before_storage() {
        let body = json!({
            "full_name": "王小明",
            "gender": "男",
            "birth_date": "1990-05-17",
            "id_number": "A123456789",
            "password": "short",
            "phone_number": "0912345678",
            "email": "ming@example.com",
            "role": "user"
        });
        let (status, body) = send(state(), json_request(Method::POST, "/register", None, body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "密碼長度必須至少 8 個字元");
    }

    #[tokio::test]
    async fn login_requires_role_scope() {
        let (status, body) = send(state(), login_request("username=A123456789&password=secret123")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("role:user"));
    }

    #[tokio::test]
    async fn login_rejects_unknown_role() {
        let (status, body) = send(
            state(),
            login_request("username=A123456789&password=secret123&scope=role%3Aadmin"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("health_center"));
    }

    #[tokio::test]
    async fn login_validates_id_format() {
        let (status, body) = send(
            state(),
            login_request("username=A12345&password=secret123&scope=role%3Auser"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().starts_with("身分證字號格式不正確"));
    }

    #[tokio::test]
    async fn forgot_password_validates_email() {
        let body = json!({"id_number": "A123456789", "email": "nobody"});
        let (status, body) = send(state(), json_request(Method::POST, "/forgot-password", None, body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "電子郵件格式不正確");
    }

    #[tokio::test]
    async fn me_requires_token() {
        let (status, body) = send(state(), get_request("/me", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["detail"], "未提供有效的 token");

        let (status, _) = send(state(), get_request("/me", Some("Bearer not-a-jwt"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn expired_token_is_reported() {
        let state = state();
        let token = state
            .tokens
            .issue_with_exp(REVIEWER_ID, crate::models::Role::User, chrono::Utc::now().timestamp() - 60);
        let (status, body) = send(state, get_request("/me", Some(&token))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["detail"], "token 已過期");
    }

    fn registration(id_number: &str) -> serde_json::Value {
        json!({
            "full_name": "王小明",
            "gender": "男",
            "birth_date": "1990-05-17",
            "id_number": id_number,
            "password": "longenough",
            "phone_number": "0912345678",
            "email": "ming@example.com",
            "role": "user"
        })
    }

    #[tokio::test]
    #[ignore = "needs Postgres at TEST_DATABASE_URL"]
    async fn register_twice_is_a_conflict() {
        let state = db_state(std::sync::Arc::new(ScriptedLlm::new(["ok"]))).await;
        let id = random_id_number();

        let (status, body) = send(state.clone(), json_request(Method::POST, "/register", None, registration(&id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "用戶註冊成功");

        let (status, body) = send(state.clone(), json_request(Method::POST, "/register", None, registration(&id))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["detail"], "身分證字號已存在");

        let form = format!("username={id}&password=longenough&scope=role%3Auser");
        let (status, body) = send(state.clone(), login_request(&form)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["token_type"], "bearer");

        purge(&state.db, &id).await;
    }

    #[tokio::test]
    #[ignore = "needs Postgres at TEST_DATABASE_URL"]
    async fn forgot_password_needs_matching_email() {
        let state = db_state(std::sync::Arc::new(ScriptedLlm::new(["ok"]))).await;
        let id = random_id_number();
        let (status, _) = send(state.clone(), json_request(Method::POST, "/register", None, registration(&id))).await;
        assert_eq!(status, StatusCode::OK);

        let wrong = json!({"id_number": id, "email": "someone@example.com"});
        let (status, body) = send(state.clone(), json_request(Method::POST, "/forgot-password", None, wrong)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "身分證字號與電子郵件不匹配");

        let right = json!({"id_number": id, "email": "ming@example.com"});
        let (status, body) = send(state.clone(), json_request(Method::POST, "/forgot-password", None, right)).await;
        assert_eq!(status, StatusCode::OK);
        let temporary = body["temporary_password"].as_str().unwrap().to_string();

        let form = format!("username={id}&password={temporary}&scope=role%3Auser");
        let (status, _) = send(state.clone(), login_request(&form)).await;
        assert_eq!(status, StatusCode::OK);

        purge(&state.db, &id).await;
    }

    #[tokio::test]
    #[ignore = "needs Postgres at TEST_DATABASE_URL"]
    async fn deleted_user_token_is_rejected() {
        let state = db_state(std::sync::Arc::new(ScriptedLlm::new(["ok"]))).await;
        let id = random_id_number();
        let token = bearer(&state, &id, crate::models::Role::User);

        let (status, body) = send(state, get_request("/me", Some(&token))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["detail"], format!("用戶 {id} 不存在"));
    }
}
