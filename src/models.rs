use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// Roles

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    HealthCenter,
    Other,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::User, Role::HealthCenter, Role::Other];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::HealthCenter => "health_center",
            Role::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.as_str() == value)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Account requests / responses

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub full_name: String,
    pub gender: String,
    /// YYYY-MM-DD
    pub birth_date: String,
    pub id_number: String,
    pub password: String,
    pub phone_number: String,
    pub email: String,
    pub role: String,
}

/// OAuth2 password-grant style form. The role travels as a `role:<name>` scope.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub scope: String,
}

impl LoginForm {
    pub fn requested_role(&self) -> Option<&str> {
        self.scope
            .split_whitespace()
            .find_map(|s| s.strip_prefix("role:"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForgotPasswordRequest {
    pub id_number: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForgotPasswordResponse {
    pub message: String,
    /// Stands in for the email that would carry the new password.
    pub temporary_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i32,
    pub full_name: String,
    pub gender: String,
    pub birth_date: NaiveDate,
    pub id_number: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub phone_number: String,
    pub email: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub full_name: String,
    pub gender: String,
    pub birth_date: NaiveDate,
    pub id_number: String,
    pub password_hash: String,
    pub phone_number: String,
    pub email: String,
    pub role: Role,
}

// Health checks

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct HealthCheckRecord {
    pub check_date: NaiveDate,
    pub extracted_text: String,
}

#[derive(Debug, Clone)]
pub struct NewHealthCheck {
    pub id_number: String,
    pub check_date: NaiveDate,
    pub extracted_text: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DateRangeQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub message: String,
    pub check_date: NaiveDate,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthAnalysis {
    pub health_data: Vec<HealthCheckRecord>,
    pub analysis_result: String,
    pub retrieved_context: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractiveRequest {
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractiveResponse {
    pub query: String,
    pub response: String,
    pub retrieved_context: String,
}

// Report analysis (JSON facade of the report service)

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeReportRequest {
    pub report_id: String,
    #[serde(default)]
    pub patient_hash: String,
    pub test_results_json: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserReportAnalysis {
    pub report_id: String,
    pub summary: String,
    pub advice: Vec<String>,
    pub recommended_policy: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiseaseRisk {
    pub disease: String,
    pub impact: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InsurerReportAnalysis {
    pub report_id: String,
    pub summary: String,
    pub metrics: BTreeMap<String, String>,
    pub policy_type: String,
    pub risks: Vec<DiseaseRisk>,
}
