use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use utoipa::{IntoParams, OpenApi, ToSchema};

use crate::{
    access,
    error::{EnrollError, ErrorKind, StorageError, UnenrollError},
    ledger::{EnrollmentLedger, UnenrollEligibility, UnenrollSummary},
    money::Money,
    progress::{self, ProgressReport},
    store::enrollment::{Enrollment, StudentCourse},
};

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::AlreadyEnrolled => StatusCode::CONFLICT,
        ErrorKind::NotEnrolled | ErrorKind::CourseNotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::StorageFailure => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for EnrollError {
    fn into_response(self) -> Response {
        (status_for(self.kind()), self.to_string()).into_response()
    }
}

impl IntoResponse for UnenrollError {
    fn into_response(self) -> Response {
        (status_for(self.kind()), self.to_string()).into_response()
    }
}

impl IntoResponse for StorageError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EnrollRequest {
    pub student_id: i64,
    pub course_id: i64,
    /// Amount authorized by the payment gateway, in cents
    pub payment_amount: Money,
    pub payment_method: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CourseRequest {
    pub student_id: i64,
    pub course_id: i64,
}

#[derive(Debug, Serialize, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AccessQuery {
    pub user_id: i64,
    pub course_id: i64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EligibilityResponse {
    pub eligibility: UnenrollEligibility,
    pub warning: Option<String>,
}

#[utoipa::path(
    context_path = "/api",
    path = "/enroll",
    method(post),
    request_body = EnrollRequest,
    responses(
        (status = 200, description = "Enrollment created", body = Enrollment),
        (status = 400, description = "Invalid input or amount not matching the price"),
        (status = 404, description = "Course not found"),
        (status = 409, description = "Already enrolled")
    )
)]
pub async fn enroll(
    State(ledger): State<Arc<EnrollmentLedger>>,
    Json(req): Json<EnrollRequest>,
) -> Result<Json<Enrollment>, EnrollError> {
    let EnrollRequest {
        student_id,
        course_id,
        payment_amount,
        payment_method,
    } = req;
    ledger
        .enroll(student_id, course_id, payment_amount, &payment_method)
        .await
        .map(Json)
}

#[utoipa::path(
    context_path = "/api",
    path = "/enroll_free",
    method(post),
    request_body = CourseRequest,
    responses(
        (status = 200, description = "Enrollment created", body = Enrollment),
        (status = 400, description = "Invalid input or course not free"),
        (status = 404, description = "Course not found"),
        (status = 409, description = "Already enrolled")
    )
)]
pub async fn enroll_free(
    State(ledger): State<Arc<EnrollmentLedger>>,
    Json(req): Json<CourseRequest>,
) -> Result<Json<Enrollment>, EnrollError> {
    ledger
        .enroll_free(req.student_id, req.course_id)
        .await
        .map(Json)
}

#[utoipa::path(
    context_path = "/api",
    path = "/unenroll",
    method(post),
    request_body = CourseRequest,
    responses(
        (status = 200, description = "Enrollment removed", body = UnenrollSummary),
        (status = 404, description = "Not enrolled")
    )
)]
pub async fn unenroll(
    State(ledger): State<Arc<EnrollmentLedger>>,
    Json(req): Json<CourseRequest>,
) -> Result<Json<UnenrollSummary>, UnenrollError> {
    ledger.unenroll(req.student_id, req.course_id).await.map(Json)
}

#[utoipa::path(
    context_path = "/api",
    path = "/eligibility",
    method(get),
    params(CourseRequest),
    responses(
        (status = 200, description = "Unenroll eligibility", body = EligibilityResponse)
    )
)]
pub async fn eligibility(
    State(ledger): State<Arc<EnrollmentLedger>>,
    Query(req): Query<CourseRequest>,
) -> Result<Json<EligibilityResponse>, StorageError> {
    let eligibility = ledger.can_unenroll(req.student_id, req.course_id).await?;
    Ok(Json(EligibilityResponse {
        eligibility,
        warning: eligibility.warning().map(str::to_string),
    }))
}

#[utoipa::path(
    context_path = "/api",
    path = "/enrollment",
    method(get),
    params(CourseRequest),
    responses(
        (status = 200, description = "The enrollment", body = Enrollment),
        (status = 404, description = "Not enrolled")
    )
)]
pub async fn get_enrollment(
    State(ledger): State<Arc<EnrollmentLedger>>,
    Query(req): Query<CourseRequest>,
) -> Response {
    match ledger.get_enrollment(req.student_id, req.course_id).await {
        Ok(Some(enrollment)) => Json(enrollment).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "Not enrolled").into_response(),
        Err(e) => e.into_response(),
    }
}

#[utoipa::path(
    context_path = "/api",
    path = "/progress",
    method(get),
    params(CourseRequest),
    responses(
        (status = 200, description = "Course progress", body = ProgressReport)
    )
)]
pub async fn get_progress(
    State(ledger): State<Arc<EnrollmentLedger>>,
    Query(req): Query<CourseRequest>,
) -> Result<Json<ProgressReport>, StorageError> {
    progress::compute_progress(ledger.database(), req.student_id, req.course_id)
        .await
        .map(Json)
}

#[utoipa::path(
    context_path = "/api",
    path = "/access",
    method(get),
    params(AccessQuery),
    responses(
        (status = 200, description = "Whether the user may view the course content", body = bool)
    )
)]
pub async fn get_access(
    State(ledger): State<Arc<EnrollmentLedger>>,
    Query(req): Query<AccessQuery>,
) -> Result<Json<bool>, StorageError> {
    access::has_access(ledger.database(), req.user_id, req.course_id)
        .await
        .map(Json)
}

#[utoipa::path(
    context_path = "/api",
    path = "/students/{student_id}/enrollments",
    method(get),
    params(("student_id" = i64, Path, description = "Student id")),
    responses(
        (status = 200, description = "Enrolled courses, newest first", body = Vec<StudentCourse>)
    )
)]
pub async fn list_enrollments(
    State(ledger): State<Arc<EnrollmentLedger>>,
    Path(student_id): Path<i64>,
) -> Result<Json<Vec<StudentCourse>>, StorageError> {
    ledger.list_enrollments(student_id).await.map(Json)
}

#[derive(OpenApi)]
#[openapi(paths(
    enroll,
    enroll_free,
    unenroll,
    eligibility,
    get_enrollment,
    get_progress,
    get_access,
    list_enrollments,
))]
pub struct ApiDoc;

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

pub fn router(ledger: Arc<EnrollmentLedger>) -> Router {
    Router::new()
        .nest(
            "/api",
            Router::new()
                .route("/enroll", post(enroll))
                .route("/enroll_free", post(enroll_free))
                .route("/unenroll", post(unenroll))
                .route("/eligibility", get(eligibility))
                .route("/enrollment", get(get_enrollment))
                .route("/progress", get(get_progress))
                .route("/access", get(get_access))
                .route("/students/{student_id}/enrollments", get(list_enrollments)),
        )
        .route("/api-docs/openapi.json", get(openapi_json))
        .layer(TraceLayer::new_for_http())
        .with_state(ledger)
}
