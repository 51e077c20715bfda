//! Loan management endpoints

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};

use crate::{
    error::{AppError, AppResult},
    models::{
        loan::ExtendLoanRequest, CreateLoanRequest, LoanDetails, LoanId, LoanQuery, LoanRecord,
        LoanStats, Pagination, UserRef,
    },
    services::loans::FineAssessment,
    AppState,
};

use super::AuthenticatedUser;

/// Page of loan records
#[derive(Serialize, ToSchema)]
pub struct LoanListResponse {
    pub loans: Vec<LoanRecord>,
    pub pagination: Pagination,
}

/// Page of loans with book, borrower and handler summaries
#[derive(Serialize, ToSchema)]
pub struct LoanDetailsListResponse {
    pub loans: Vec<LoanDetails>,
    pub pagination: Pagination,
}

/// Return response with the closed loan
#[derive(Serialize, ToSchema)]
pub struct ReturnResponse {
    /// Return status
    pub status: String,
    pub loan: LoanRecord,
}

/// Extension result
#[derive(Serialize, ToSchema)]
pub struct ExtendResponse {
    pub id: LoanId,
    /// New due date (ISO 8601 format)
    pub due_date: DateTime<Utc>,
    pub renewal_count: i32,
}

/// Paging for the caller's own loans
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct MyLoansQuery {
    /// Page number (1-based)
    pub page: Option<i64>,
    /// Items per page
    pub per_page: Option<i64>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct UserLoansQuery {
    /// Skip the fine assessment (no write on this read)
    pub read_only: Option<bool>,
}

/// Create a new loan
#[utoipa::path(
    post,
    path = "/loans",
    tag = "loans",
    security(("bearer_auth" = [])),
    request_body = CreateLoanRequest,
    responses(
        (status = 201, description = "Loan created", body = LoanRecord),
        (status = 400, description = "Invalid request", body = crate::error::ErrorResponse),
        (status = 403, description = "Readers may only borrow for themselves"),
        (status = 404, description = "Book not found"),
        (status = 409, description = "Already borrowed by this user or book unavailable")
    )
)]
pub async fn create_loan(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    payload: Result<Json<CreateLoanRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<LoanRecord>)> {
    let Json(mut request) =
        payload.map_err(|rejection| AppError::Validation(vec![rejection.body_text()]))?;

    if !claims.is_staff() {
        let user = request.user_id.as_ref().and_then(Value::as_str);
        if let Some(user) = user.and_then(UserRef::parse) {
            claims.require_self_or_staff(&user)?;
        }
    }

    // The handler is always the authenticated caller, never client input
    request.handled_by = Some(Value::String(
        claims
            .role_id
            .clone()
            .unwrap_or_else(|| state.services.loans.default_handler().to_string()),
    ));

    let loan = state.services.loans.create_loan(request).await?;
    Ok((StatusCode::CREATED, Json(loan)))
}

/// List loans
#[utoipa::path(
    get,
    path = "/loans",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(LoanQuery),
    responses(
        (status = 200, description = "Page of loans", body = LoanListResponse)
    )
)]
pub async fn list_loans(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Query(query): Query<LoanQuery>,
) -> AppResult<Json<LoanListResponse>> {
    claims.require_staff()?;

    let (loans, pagination) = state.services.loans.list_loans(&query).await?;
    Ok(Json(LoanListResponse { loans, pagination }))
}

/// List loans with book, borrower and handler details
#[utoipa::path(
    get,
    path = "/loans/details",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(LoanQuery),
    responses(
        (status = 200, description = "Page of detailed loans", body = LoanDetailsListResponse)
    )
)]
pub async fn list_loans_with_details(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Query(query): Query<LoanQuery>,
) -> AppResult<Json<LoanDetailsListResponse>> {
    claims.require_staff()?;

    let (loans, pagination) = state.services.loans.list_loans_with_details(&query).await?;
    Ok(Json(LoanDetailsListResponse { loans, pagination }))
}

/// Active loans past their due date
#[utoipa::path(
    get,
    path = "/loans/overdue",
    tag = "loans",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Overdue loans", body = Vec<LoanRecord>)
    )
)]
pub async fn list_overdue(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<Vec<LoanRecord>>> {
    claims.require_staff()?;
    Ok(Json(state.services.loans.list_overdue().await?))
}

/// Library-wide loan counters
#[utoipa::path(
    get,
    path = "/loans/stats",
    tag = "loans",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Loan counters", body = LoanStats)
    )
)]
pub async fn get_stats(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<LoanStats>> {
    claims.require_staff()?;
    Ok(Json(state.services.loans.stats().await?))
}

/// The caller's loans, fines brought up to date
#[utoipa::path(
    get,
    path = "/loans/me",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(MyLoansQuery),
    responses(
        (status = 200, description = "Caller's loans", body = LoanDetailsListResponse)
    )
)]
pub async fn my_loans(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Query(query): Query<MyLoansQuery>,
) -> AppResult<Json<LoanDetailsListResponse>> {
    let (loans, pagination) = state
        .services
        .loans
        .my_loans(&claims.user_id, query.page, query.per_page)
        .await?;
    Ok(Json(LoanDetailsListResponse { loans, pagination }))
}

/// The caller's loan counters
#[utoipa::path(
    get,
    path = "/loans/me/stats",
    tag = "loans",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Caller's loan counters", body = LoanStats)
    )
)]
pub async fn my_stats(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<LoanStats>> {
    Ok(Json(state.services.loans.user_stats(&claims.user_id).await?))
}

/// Get a loan
#[utoipa::path(
    get,
    path = "/loans/{id}",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(
        ("id" = String, Path, description = "Loan ID")
    ),
    responses(
        (status = 200, description = "Loan", body = LoanRecord),
        (status = 403, description = "Loan of another user"),
        (status = 404, description = "Loan not found")
    )
)]
pub async fn get_loan(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<LoanId>,
) -> AppResult<Json<LoanRecord>> {
    let loan = state.services.loans.get_loan(id).await?;
    claims.require_self_or_staff(&loan.user_id)?;
    Ok(Json(loan))
}

/// Return a borrowed book
#[utoipa::path(
    post,
    path = "/loans/{id}/return",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(
        ("id" = String, Path, description = "Loan ID")
    ),
    responses(
        (status = 200, description = "Book returned", body = ReturnResponse),
        (status = 404, description = "Loan not found"),
        (status = 409, description = "Already returned")
    )
)]
pub async fn return_loan(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<LoanId>,
) -> AppResult<Json<ReturnResponse>> {
    claims.require_staff()?;

    let loan = state.services.loans.return_loan(id).await?;
    Ok(Json(ReturnResponse {
        status: "returned".to_string(),
        loan,
    }))
}

/// Extend a loan
#[utoipa::path(
    post,
    path = "/loans/{id}/extend",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(
        ("id" = String, Path, description = "Loan ID")
    ),
    request_body(content = ExtendLoanRequest, description = "Days to add, the configured default when omitted"),
    responses(
        (status = 200, description = "Loan extended", body = ExtendResponse),
        (status = 400, description = "extend_days not an integer or out of range"),
        (status = 404, description = "Loan not found"),
        (status = 409, description = "Loan already returned")
    )
)]
pub async fn extend_loan(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<LoanId>,
    body: Bytes,
) -> AppResult<Json<ExtendResponse>> {
    if !claims.is_staff() {
        let loan = state.services.loans.get_loan(id).await?;
        claims.require_self_or_staff(&loan.user_id)?;
    }

    // An empty body asks for the default extension
    let extend_days = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        serde_json::from_slice::<ExtendLoanRequest>(&body)
            .map_err(|_| AppError::Validation(vec!["extend_days must be an integer".to_string()]))?
            .extend_days
    };

    let loan = state.services.loans.extend_loan(id, extend_days).await?;

    Ok(Json(ExtendResponse {
        id: loan.id,
        due_date: loan.due_date,
        renewal_count: loan.renewal_count.unwrap_or(0),
    }))
}

/// Recompute and store the fine of a loan
#[utoipa::path(
    post,
    path = "/loans/{id}/assess-fine",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(
        ("id" = String, Path, description = "Loan ID")
    ),
    responses(
        (status = 200, description = "Loan with current fine", body = LoanRecord),
        (status = 404, description = "Loan not found")
    )
)]
pub async fn assess_fine(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<LoanId>,
) -> AppResult<Json<LoanRecord>> {
    claims.require_staff()?;
    Ok(Json(state.services.loans.assess_fine(id).await?))
}

/// Record payment of an outstanding fine
#[utoipa::path(
    post,
    path = "/loans/{id}/pay-fine",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(
        ("id" = String, Path, description = "Loan ID")
    ),
    responses(
        (status = 200, description = "Fine paid", body = LoanRecord),
        (status = 404, description = "Loan not found"),
        (status = 409, description = "Nothing to pay")
    )
)]
pub async fn pay_fine(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<LoanId>,
) -> AppResult<Json<LoanRecord>> {
    claims.require_staff()?;
    Ok(Json(state.services.loans.pay_fine(id).await?))
}

/// Get loans for a specific user
#[utoipa::path(
    get,
    path = "/users/{id}/loans",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(
        ("id" = String, Path, description = "User ID"),
        UserLoansQuery
    ),
    responses(
        (status = 200, description = "User's loans, most recent first", body = Vec<LoanRecord>),
        (status = 400, description = "Malformed user id")
    )
)]
pub async fn get_user_loans(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(user_id): Path<String>,
    Query(query): Query<UserLoansQuery>,
) -> AppResult<Json<Vec<LoanRecord>>> {
    let user = UserRef::parse(&user_id).ok_or_else(|| {
        AppError::Validation(vec!["user_id must be a valid 24-char hex string".to_string()])
    })?;
    claims.require_self_or_staff(&user)?;

    let assessment = if query.read_only.unwrap_or(false) {
        FineAssessment::Skip
    } else {
        FineAssessment::Apply
    };
    Ok(Json(state.services.loans.list_by_user(&user, assessment).await?))
}
