use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::domain::{AccountId, BillingAccount, LockTransition, PaymentEvent};
use super::escalation::ComplianceError;
use super::repository::AccountRepository;
use super::service::ComplianceService;
use crate::access::AccountRole;
use crate::error::error_response;
use crate::persistence::Versioned;

#[derive(Debug, Deserialize)]
pub(crate) struct OpenAccountRequest {
    pub owner_id: String,
    pub role: AccountRole,
}

#[derive(Debug, Deserialize)]
pub(crate) struct InvoiceRequest {
    pub invoice_id: String,
    pub amount: u64,
    pub due_date: NaiveDate,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct TickRequest {
    #[serde(default)]
    pub today: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PaymentRequest {
    pub payment_ref: String,
    pub amount: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UnlockRequest {
    pub admin_id: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Serialize)]
struct TickResponse<T> {
    account: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    transition: Option<LockTransition>,
}

/// Router exposing billing-account lock operations and the payment-gateway webhook.
pub fn compliance_router<R>(service: Arc<ComplianceService<R>>) -> Router
where
    R: AccountRepository + 'static,
{
    Router::new()
        .route("/api/v1/billing/accounts", post(open_handler::<R>))
        .route(
            "/api/v1/billing/accounts/:account_id",
            get(account_handler::<R>),
        )
        .route(
            "/api/v1/billing/accounts/:account_id/audit",
            get(history_handler::<R>),
        )
        .route(
            "/api/v1/billing/accounts/:account_id/invoices",
            post(invoice_handler::<R>),
        )
        .route(
            "/api/v1/billing/accounts/:account_id/tick",
            post(tick_handler::<R>),
        )
        .route(
            "/api/v1/billing/accounts/:account_id/payments",
            post(payment_handler::<R>),
        )
        .route(
            "/api/v1/billing/accounts/:account_id/unlock",
            post(unlock_handler::<R>),
        )
        .route("/api/v1/billing/webhooks/payment", post(webhook_handler::<R>))
        .with_state(service)
}

fn account_response<R>(
    service: &ComplianceService<R>,
    status: StatusCode,
    result: Result<Versioned<BillingAccount>, ComplianceError>,
) -> Response
where
    R: AccountRepository + 'static,
{
    match result.and_then(|stored| service.account_view(&stored.value.id)) {
        Ok(view) => (status, Json(view)).into_response(),
        Err(err) => error_response(err.kind(), err),
    }
}

pub(crate) async fn open_handler<R>(
    State(service): State<Arc<ComplianceService<R>>>,
    Json(request): Json<OpenAccountRequest>,
) -> Response
where
    R: AccountRepository + 'static,
{
    let result = service.open_account(&request.owner_id, request.role);
    account_response(&service, StatusCode::CREATED, result)
}

pub(crate) async fn account_handler<R>(
    State(service): State<Arc<ComplianceService<R>>>,
    Path(account_id): Path<String>,
) -> Response
where
    R: AccountRepository + 'static,
{
    match service.account_view(&AccountId(account_id)) {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(err) => error_response(err.kind(), err),
    }
}

pub(crate) async fn history_handler<R>(
    State(service): State<Arc<ComplianceService<R>>>,
    Path(account_id): Path<String>,
) -> Response
where
    R: AccountRepository + 'static,
{
    match service.account_history(&AccountId(account_id)) {
        Ok(entries) => (StatusCode::OK, Json(entries)).into_response(),
        Err(err) => error_response(err.kind(), err),
    }
}

pub(crate) async fn invoice_handler<R>(
    State(service): State<Arc<ComplianceService<R>>>,
    Path(account_id): Path<String>,
    Json(request): Json<InvoiceRequest>,
) -> Response
where
    R: AccountRepository + 'static,
{
    let result = service.issue_invoice(
        &AccountId(account_id),
        &request.invoice_id,
        request.amount,
        request.due_date,
    );
    account_response(&service, StatusCode::CREATED, result)
}

pub(crate) async fn tick_handler<R>(
    State(service): State<Arc<ComplianceService<R>>>,
    Path(account_id): Path<String>,
    request: Option<Json<TickRequest>>,
) -> Response
where
    R: AccountRepository + 'static,
{
    let today = request
        .and_then(|Json(request)| request.today)
        .unwrap_or_else(|| service.today());
    let account_id = AccountId(account_id);

    let result = service
        .tick(&account_id, today)
        .and_then(|outcome| Ok((service.account_view(&account_id)?, outcome.transition)));
    match result {
        Ok((account, transition)) => (
            StatusCode::OK,
            Json(TickResponse {
                account,
                transition,
            }),
        )
            .into_response(),
        Err(err) => error_response(err.kind(), err),
    }
}

pub(crate) async fn payment_handler<R>(
    State(service): State<Arc<ComplianceService<R>>>,
    Path(account_id): Path<String>,
    Json(request): Json<PaymentRequest>,
) -> Response
where
    R: AccountRepository + 'static,
{
    let result = service.settle_payment(
        &AccountId(account_id),
        &request.payment_ref,
        request.amount,
    );
    account_response(&service, StatusCode::OK, result)
}

pub(crate) async fn unlock_handler<R>(
    State(service): State<Arc<ComplianceService<R>>>,
    Path(account_id): Path<String>,
    Json(request): Json<UnlockRequest>,
) -> Response
where
    R: AccountRepository + 'static,
{
    let result = service.manual_unlock(
        &AccountId(account_id),
        &request.admin_id,
        &request.reason,
    );
    account_response(&service, StatusCode::OK, result)
}

/// Gateway callback. Failed payments are acknowledged with 202 and leave the account as is.
pub(crate) async fn webhook_handler<R>(
    State(service): State<Arc<ComplianceService<R>>>,
    Json(event): Json<PaymentEvent>,
) -> Response
where
    R: AccountRepository + 'static,
{
    match service.handle_payment_event(&event) {
        Ok(Some(stored)) => account_response(&service, StatusCode::OK, Ok(stored)),
        Ok(None) => StatusCode::ACCEPTED.into_response(),
        Err(err) => error_response(err.kind(), err),
    }
}
