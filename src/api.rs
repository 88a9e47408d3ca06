// 🌐 REST API - thin axum layer over School
//
// Every response uses the same wrapper: { success, data, error }.
// Login hands out a bearer token; mutating routes resolve the actor from it.

use crate::access::{Identity, Role};
use crate::config::DEFAULT_SESSION_TTL;
use crate::audit::AuditEntry;
use crate::entities::{Student, Teacher};
use crate::error::{AuthError, SchoolError};
use crate::grades::Grade;
use crate::reconciliation::{FinancialStatus, RosterSummary};
use crate::school::{PendingVerification, School, TeacherGroup};
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

struct Session {
    identity: Identity,
    issued_at: Instant,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    school: Arc<School>,
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    session_ttl: Duration,
}

impl AppState {
    pub fn new(school: Arc<School>) -> Self {
        AppState {
            school,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            session_ttl: DEFAULT_SESSION_TTL,
        }
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    fn open_session(&self, identity: Identity) -> String {
        let token = uuid::Uuid::new_v4().to_string();
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        self.evict_expired(&mut sessions);
        sessions.insert(
            token.clone(),
            Session {
                identity,
                issued_at: Instant::now(),
            },
        );
        token
    }

    fn close_session(&self, token: &str) -> bool {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(token)
            .is_some()
    }

    /// Resolve `Authorization: Bearer <token>`.
    ///
    /// Expired sessions are dropped, as are student sessions whose student
    /// left the roster (e.g. after a reseed).
    fn actor(&self, headers: &HeaderMap) -> Result<Identity, ApiError> {
        let token = bearer_token(headers)?;

        let identity = {
            let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
            self.evict_expired(&mut sessions);
            sessions
                .get(token)
                .map(|session| session.identity.clone())
                .ok_or(ApiError::Unauthenticated)?
        };

        if identity.role == Role::Student && self.school.student(&identity.actor_id).is_err() {
            self.close_session(token);
            tracing::info!(actor = %identity.actor_id, "session closed, student no longer enrolled");
            return Err(ApiError::Unauthenticated);
        }
        Ok(identity)
    }

    fn evict_expired(&self, sessions: &mut HashMap<String, Session>) {
        let ttl = self.session_ttl;
        sessions.retain(|_, session| session.issued_at.elapsed() < ttl);
    }
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or(ApiError::Unauthenticated)
}

// ============================================================================
// RESPONSE WRAPPER & ERRORS
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Machine-readable failure code, see `SchoolError::code`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }

    fn failure(error: String, code: &str, data: Option<T>) -> Self {
        Self {
            success: false,
            data,
            error: Some(error),
            code: Some(code.to_string()),
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    /// No or unknown bearer token
    Unauthenticated,
    School(SchoolError),
}

impl From<SchoolError> for ApiError {
    fn from(err: SchoolError) -> Self {
        ApiError::School(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::School(err) => match err {
                SchoolError::Auth(AuthError::InvalidCredentials) => StatusCode::UNAUTHORIZED,
                SchoolError::Auth(AuthError::DebtBlocked { .. })
                | SchoolError::Forbidden { .. }
                | SchoolError::GradeLocked { .. } => StatusCode::FORBIDDEN,
                SchoolError::NotFound { .. } => StatusCode::NOT_FOUND,
                SchoolError::Conflict(_) | SchoolError::InvalidTransition { .. } => {
                    StatusCode::CONFLICT
                }
                SchoolError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                SchoolError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Unauthenticated => "authentication required".to_string(),
            // Storage details stay in the server log
            ApiError::School(SchoolError::Persistence(_)) => {
                "the request could not be saved, please try again".to_string()
            }
            ApiError::School(err) => err.to_string(),
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthenticated => "unauthenticated",
            ApiError::School(err) => err.code(),
        }
    }

    /// Extra context a client can act on; a blocked login still reports
    /// the computed status
    fn detail(&self) -> Option<serde_json::Value> {
        match self {
            ApiError::School(SchoolError::Auth(AuthError::DebtBlocked { status })) => {
                Some(serde_json::json!({ "status": status }))
            }
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::School(SchoolError::Persistence(err)) = &self {
            tracing::error!(error = %err, "request failed on persistence");
        }
        (
            self.status(),
            Json(ApiResponse::failure(self.message(), self.code(), self.detail())),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::ok(data)))
}

// ============================================================================
// REQUEST / RESPONSE BODIES
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    /// Matrícula for students, login e-mail for staff
    pub identifier: String,
    pub credential: String,
    pub role: Role,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub identity: Identity,
    pub status: FinancialStatus,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub verified: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofRequest {
    pub proof_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeRequest {
    pub student_id: String,
    /// Number or numeric string; validated server-side
    pub value: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardResponse {
    pub summary: RosterSummary,
    pub pending_verifications: Vec<PendingVerification>,
}

#[derive(Debug, Deserialize)]
pub struct TeacherQuery {
    pub campus: Option<String>,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /api/health
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// POST /api/login
async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> ApiResult<LoginResponse> {
    let outcome = state
        .school
        .authenticate(&req.identifier, &req.credential, req.role)?;
    let token = state.open_session(outcome.identity.clone());

    ok(LoginResponse {
        token,
        identity: outcome.identity,
        status: outcome.status,
    })
}

/// POST /api/logout
async fn logout(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<bool> {
    let token = bearer_token(&headers)?;
    if !state.close_session(token) {
        return Err(ApiError::Unauthenticated);
    }
    ok(true)
}

/// GET /api/students - scoped to what the caller may see
async fn list_students(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Vec<Student>> {
    let actor = state.actor(&headers)?;
    let students = state.school.students();

    let visible = match actor.role {
        Role::Owner | Role::Admin => students,
        Role::Teacher => students
            .into_iter()
            .filter(|s| s.teacher_id.as_deref() == Some(actor.actor_id.as_str()))
            .collect(),
        Role::Student => students
            .into_iter()
            .filter(|s| s.id == actor.actor_id)
            .collect(),
    };
    ok(visible)
}

/// GET /api/students/:id
async fn get_student(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Student> {
    let actor = state.actor(&headers)?;
    let student = state.school.student(&id)?;

    let visible = match actor.role {
        Role::Owner | Role::Admin => true,
        Role::Teacher => student.teacher_id.as_deref() == Some(actor.actor_id.as_str()),
        Role::Student => student.id == actor.actor_id,
    };
    if !visible {
        return Err(SchoolError::Forbidden {
            role: actor.role,
            action: "view this student",
        }
        .into());
    }
    ok(student)
}

/// POST /api/payments/:id/verify
async fn verify_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(payment_id): Path<String>,
    Json(req): Json<VerifyRequest>,
) -> ApiResult<Student> {
    let actor = state.actor(&headers)?;
    ok(state.school.set_verified(&actor, &payment_id, req.verified)?)
}

/// POST /api/payments/:id/proof
async fn attach_proof(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(payment_id): Path<String>,
    Json(req): Json<ProofRequest>,
) -> ApiResult<Student> {
    let actor = state.actor(&headers)?;
    ok(state.school.attach_proof(&actor, &payment_id, &req.proof_url)?)
}

/// POST /api/grades
async fn write_grade(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<GradeRequest>,
) -> ApiResult<Student> {
    let actor = state.actor(&headers)?;
    let grade = Grade::from_json(&req.value).map_err(SchoolError::from)?;
    ok(state.school.write_grade(&actor, &req.student_id, grade)?)
}

/// GET /api/audit - newest first
async fn audit_log(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Vec<AuditEntry>> {
    let actor = state.actor(&headers)?;
    crate::access::require_administrative(&actor, "read the audit log")?;
    ok(state.school.audit_log()?)
}

/// GET /api/summary
async fn summary(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<DashboardResponse> {
    let actor = state.actor(&headers)?;
    crate::access::require_administrative(&actor, "view the dashboard")?;
    ok(DashboardResponse {
        summary: state.school.summary(),
        pending_verifications: state.school.pending_verifications(),
    })
}

/// GET /api/teachers?campus=
async fn list_teachers(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TeacherQuery>,
) -> ApiResult<Vec<Teacher>> {
    state.actor(&headers)?;
    let teachers = match query.campus.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        Some(campus) => state.school.teachers_on_campus(campus),
        None => state.school.teachers(),
    };
    ok(teachers)
}

/// GET /api/teachers/groups - students per teacher plus the unassigned bucket
async fn teacher_groups(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Vec<TeacherGroup>> {
    let actor = state.actor(&headers)?;
    crate::access::require_administrative(&actor, "view teacher assignments")?;
    ok(state.school.students_by_teacher())
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/students", get(list_students))
        .route("/students/:id", get(get_student))
        .route("/payments/:id/verify", post(verify_payment))
        .route("/payments/:id/proof", post(attach_proof))
        .route("/grades", post(write_grade))
        .route("/audit", get(audit_log))
        .route("/summary", get(summary))
        .route("/teachers", get(list_teachers))
        .route("/teachers/groups", get(teacher_groups))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
