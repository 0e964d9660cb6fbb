use std::sync::Arc;

use actix_web::{
    get, http::StatusCode, post, web, HttpRequest, HttpResponse, ResponseError,
};
use serde::Deserialize;
use serde_json::json;

use crate::{
    auth::{identify_caller, verify_gateway_signature},
    error::LedgerError,
    query::LedgerQueryService,
    reconcile::{CompletionEvent, Reconciler, RedirectCompletion},
    schemas::{ExpenseId, GroupId, Money, UserId},
    store::LedgerStore,
};

pub struct AppState {
    pub queries: LedgerQueryService,
    pub reconciler: Reconciler,
    auth_secret: Vec<u8>,
    webhook_secret: Vec<u8>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        auth_secret: impl Into<Vec<u8>>,
        webhook_secret: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            queries: LedgerQueryService::new(store.clone()),
            reconciler: Reconciler::new(store),
            auth_secret: auth_secret.into(),
            webhook_secret: webhook_secret.into(),
        }
    }

    fn caller(&self, request: &HttpRequest) -> Result<UserId, LedgerError> {
        identify_caller(request, &self.auth_secret).ok_or(LedgerError::Unauthenticated)
    }
}

impl ResponseError for LedgerError {
    fn status_code(&self) -> StatusCode {
        match self {
            LedgerError::InvalidExpense(_)
            | LedgerError::PaymentDetailsMissing(_)
            | LedgerError::InvalidPayment(_)
            | LedgerError::NotAParticipant { .. } => StatusCode::BAD_REQUEST,
            LedgerError::Unauthenticated => StatusCode::UNAUTHORIZED,
            LedgerError::Authorization { .. } => StatusCode::FORBIDDEN,
            LedgerError::ExpenseNotFound(_)
            | LedgerError::GroupNotFound(_)
            | LedgerError::ConfirmationNotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::AlreadySettled { .. } => StatusCode::CONFLICT,
            LedgerError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if let LedgerError::Store(err) = self {
            tracing::error!("Store failure: {}", err);
        }
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}

#[derive(Deserialize, Default)]
struct CashRequest {
    amount: Option<Money>,
}

#[get("/users/{id}/summary")]
async fn user_summary(
    request: HttpRequest,
    state: web::Data<AppState>,
    id: web::Path<UserId>,
) -> Result<HttpResponse, LedgerError> {
    state.caller(&request)?;
    let summary = state.queries.get_user_summary(&id).await?;
    Ok(HttpResponse::Ok().json(summary))
}

#[get("/users/{id}/expenses")]
async fn user_expenses(
    request: HttpRequest,
    state: web::Data<AppState>,
    id: web::Path<UserId>,
) -> Result<HttpResponse, LedgerError> {
    state.caller(&request)?;
    let expenses = state.queries.get_user_expenses(&id).await?;
    Ok(HttpResponse::Ok().json(expenses))
}

#[get("/users/{id}/transactions")]
async fn user_transactions(
    request: HttpRequest,
    state: web::Data<AppState>,
    id: web::Path<UserId>,
) -> Result<HttpResponse, LedgerError> {
    state.caller(&request)?;
    let transactions = state.queries.get_user_transactions(&id).await?;
    Ok(HttpResponse::Ok().json(transactions))
}

#[get("/groups/{id}/balance")]
async fn group_balance(
    request: HttpRequest,
    state: web::Data<AppState>,
    id: web::Path<GroupId>,
) -> Result<HttpResponse, LedgerError> {
    state.caller(&request)?;
    let balances = state.queries.get_group_balances(&id).await?;
    Ok(HttpResponse::Ok().json(balances))
}

#[get("/groups/{id}/transactions")]
async fn group_transactions(
    request: HttpRequest,
    state: web::Data<AppState>,
    id: web::Path<GroupId>,
) -> Result<HttpResponse, LedgerError> {
    state.caller(&request)?;
    let transactions = state.queries.get_group_transactions(&id).await?;
    Ok(HttpResponse::Ok().json(transactions))
}

#[get("/expenses/{id}/settlement")]
async fn expense_settlement(
    request: HttpRequest,
    state: web::Data<AppState>,
    id: web::Path<ExpenseId>,
) -> Result<HttpResponse, LedgerError> {
    state.caller(&request)?;
    let status = state.queries.get_expense_settlement_status(&id).await?;
    Ok(HttpResponse::Ok().json(status))
}

#[post("/expenses/{id}/cash-confirmations")]
async fn request_cash_confirmation(
    request: HttpRequest,
    state: web::Data<AppState>,
    id: web::Path<ExpenseId>,
    body: Option<web::Json<CashRequest>>,
) -> Result<HttpResponse, LedgerError> {
    let caller = state.caller(&request)?;
    let amount = body.and_then(|json| json.into_inner().amount);
    let confirmation = state
        .reconciler
        .request_confirmation(&caller, &id, amount)
        .await?;
    Ok(HttpResponse::Created().json(confirmation))
}

#[post("/cash-confirmations/{token}/settle")]
async fn confirm_cash_payment(
    request: HttpRequest,
    state: web::Data<AppState>,
    token: web::Path<String>,
) -> Result<HttpResponse, LedgerError> {
    let caller = state.caller(&request)?;
    let transaction = state.reconciler.confirm_and_settle(&caller, &token).await?;
    Ok(HttpResponse::Ok().json(transaction))
}

/// Checkout redirect landing. Reports what the webhook recorded; the
/// redirect itself is never trusted to record a payment.
#[post("/payments/complete")]
async fn complete_payment(
    request: HttpRequest,
    state: web::Data<AppState>,
    redirect: web::Json<RedirectCompletion>,
) -> Result<HttpResponse, LedgerError> {
    let caller = state.caller(&request)?;
    match state.reconciler.redirect_status(&caller, &redirect).await? {
        Some(transaction) => Ok(HttpResponse::Ok().json(transaction)),
        None => Ok(HttpResponse::Accepted().json(json!({ "status": "pending" }))),
    }
}

#[post("/payments/webhook")]
async fn payment_webhook(
    request: HttpRequest,
    state: web::Data<AppState>,
    body: web::Bytes,
) -> Result<HttpResponse, LedgerError> {
    if !verify_gateway_signature(&request, &body, &state.webhook_secret) {
        tracing::warn!("Rejected webhook with a bad signature");
        return Err(LedgerError::Unauthenticated);
    }
    let event: CompletionEvent = serde_json::from_slice(&body)
        .map_err(|err| LedgerError::InvalidPayment(format!("malformed event: {err}")))?;
    let transaction = state.reconciler.reconcile(&event).await?;
    Ok(HttpResponse::Ok().json(transaction))
}

pub fn configure(config: &mut web::ServiceConfig) {
    config
        .service(user_summary)
        .service(user_expenses)
        .service(user_transactions)
        .service(group_balance)
        .service(group_transactions)
        .service(expense_settlement)
        .service(request_cash_confirmation)
        .service(confirm_cash_payment)
        .service(complete_payment)
        .service(payment_webhook);
}
