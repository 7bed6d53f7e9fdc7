use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use super::domain::{
    CaseId, CaseOutcome, ReviewDecision, StageName, StageStatus, SubjectType, VerificationCase,
};
use super::pipeline::VerificationError;
use super::repository::{CaseFilter, CaseRepository, InterviewScheduler};
use super::service::{VerificationService, DEFAULT_PAGE_SIZE};
use crate::error::error_response;
use crate::persistence::Versioned;

#[derive(Debug, Deserialize)]
pub(crate) struct OpenCaseRequest {
    pub subject_type: SubjectType,
    pub subject_id: String,
}

/// Moderator queue query string; `status` filters on the case outcome.
#[derive(Debug, Deserialize)]
pub(crate) struct ListCasesQuery {
    pub subject_type: Option<SubjectType>,
    pub stage_status: Option<StageStatus>,
    pub status: Option<CaseOutcome>,
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EvidenceRequest {
    pub stage: StageName,
    #[serde(default)]
    pub evidence_refs: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DecisionRequest {
    pub reviewer_id: String,
    pub decision: ReviewDecision,
    #[serde(default)]
    pub feedback: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct InterviewRequest {
    pub slot_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReopenRequest {
    pub admin_id: String,
    #[serde(default)]
    pub reason: String,
}

/// Router exposing the reviewer and applicant operations of the verification pipeline.
pub fn verification_router<R, S>(service: Arc<VerificationService<R, S>>) -> Router
where
    R: CaseRepository + 'static,
    S: InterviewScheduler + 'static,
{
    Router::new()
        .route(
            "/api/v1/verification/cases",
            post(open_handler::<R, S>).get(list_handler::<R, S>),
        )
        .route(
            "/api/v1/verification/cases/:case_id",
            get(case_handler::<R, S>),
        )
        .route(
            "/api/v1/verification/cases/:case_id/audit",
            get(history_handler::<R, S>),
        )
        .route(
            "/api/v1/verification/cases/:case_id/evidence",
            post(evidence_handler::<R, S>),
        )
        .route(
            "/api/v1/verification/cases/:case_id/decisions",
            post(decision_handler::<R, S>),
        )
        .route(
            "/api/v1/verification/cases/:case_id/interview",
            post(interview_handler::<R, S>),
        )
        .route(
            "/api/v1/verification/cases/:case_id/interview/complete",
            post(interview_complete_handler::<R, S>),
        )
        .route(
            "/api/v1/verification/cases/:case_id/reopen",
            post(reopen_handler::<R, S>),
        )
        .with_state(service)
}

fn case_response(
    status: StatusCode,
    result: Result<Versioned<VerificationCase>, VerificationError>,
) -> Response {
    match result {
        Ok(stored) => (status, Json(stored.value.status_view(stored.version))).into_response(),
        Err(err) => error_response(err.kind(), err),
    }
}

pub(crate) async fn open_handler<R, S>(
    State(service): State<Arc<VerificationService<R, S>>>,
    Json(request): Json<OpenCaseRequest>,
) -> Response
where
    R: CaseRepository + 'static,
    S: InterviewScheduler + 'static,
{
    case_response(
        StatusCode::CREATED,
        service.open_case(request.subject_type, &request.subject_id),
    )
}

pub(crate) async fn list_handler<R, S>(
    State(service): State<Arc<VerificationService<R, S>>>,
    Query(query): Query<ListCasesQuery>,
) -> Response
where
    R: CaseRepository + 'static,
    S: InterviewScheduler + 'static,
{
    let filter = CaseFilter {
        subject_type: query.subject_type,
        stage_status: query.stage_status,
        outcome: query.status,
    };
    match service.list_cases(
        &filter,
        query.page.unwrap_or(1),
        query.limit.unwrap_or(DEFAULT_PAGE_SIZE),
    ) {
        Ok(listing) => (StatusCode::OK, Json(listing)).into_response(),
        Err(err) => error_response(err.kind(), err),
    }
}

pub(crate) async fn case_handler<R, S>(
    State(service): State<Arc<VerificationService<R, S>>>,
    Path(case_id): Path<String>,
) -> Response
where
    R: CaseRepository + 'static,
    S: InterviewScheduler + 'static,
{
    case_response(StatusCode::OK, service.get_case(&CaseId(case_id)))
}

pub(crate) async fn history_handler<R, S>(
    State(service): State<Arc<VerificationService<R, S>>>,
    Path(case_id): Path<String>,
) -> Response
where
    R: CaseRepository + 'static,
    S: InterviewScheduler + 'static,
{
    match service.case_history(&CaseId(case_id)) {
        Ok(entries) => (StatusCode::OK, Json(entries)).into_response(),
        Err(err) => error_response(err.kind(), err),
    }
}

pub(crate) async fn evidence_handler<R, S>(
    State(service): State<Arc<VerificationService<R, S>>>,
    Path(case_id): Path<String>,
    Json(request): Json<EvidenceRequest>,
) -> Response
where
    R: CaseRepository + 'static,
    S: InterviewScheduler + 'static,
{
    case_response(
        StatusCode::ACCEPTED,
        service.submit_evidence(&CaseId(case_id), request.stage, request.evidence_refs),
    )
}

pub(crate) async fn decision_handler<R, S>(
    State(service): State<Arc<VerificationService<R, S>>>,
    Path(case_id): Path<String>,
    Json(request): Json<DecisionRequest>,
) -> Response
where
    R: CaseRepository + 'static,
    S: InterviewScheduler + 'static,
{
    case_response(
        StatusCode::OK,
        service.record_decision(
            &CaseId(case_id),
            &request.reviewer_id,
            request.decision,
            request.feedback,
        ),
    )
}

pub(crate) async fn interview_handler<R, S>(
    State(service): State<Arc<VerificationService<R, S>>>,
    Path(case_id): Path<String>,
    Json(request): Json<InterviewRequest>,
) -> Response
where
    R: CaseRepository + 'static,
    S: InterviewScheduler + 'static,
{
    case_response(
        StatusCode::OK,
        service.schedule_interview(&CaseId(case_id), &request.slot_id),
    )
}

pub(crate) async fn interview_complete_handler<R, S>(
    State(service): State<Arc<VerificationService<R, S>>>,
    Path(case_id): Path<String>,
) -> Response
where
    R: CaseRepository + 'static,
    S: InterviewScheduler + 'static,
{
    case_response(StatusCode::OK, service.complete_interview(&CaseId(case_id)))
}

pub(crate) async fn reopen_handler<R, S>(
    State(service): State<Arc<VerificationService<R, S>>>,
    Path(case_id): Path<String>,
    Json(request): Json<ReopenRequest>,
) -> Response
where
    R: CaseRepository + 'static,
    S: InterviewScheduler + 'static,
{
    case_response(
        StatusCode::OK,
        service.reopen_case(&CaseId(case_id), &request.admin_id, &request.reason),
    )
}
