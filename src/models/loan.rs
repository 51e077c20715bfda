//! Loan (borrowing) record and related types

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use super::book::BookSummary;
use super::ids::{BookRef, LoanId, UserRef};
use super::user::{HandlerSummary, UserSummary};
use crate::error::{AppError, AppResult};

/// Persisted borrowing record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct LoanRecord {
    pub id: LoanId,
    pub user_id: UserRef,
    pub book_id: BookRef,
    pub borrow_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    /// Set once, when the book comes back
    pub return_date: Option<DateTime<Utc>>,
    /// true while the loan is active
    pub is_borrowed: bool,
    /// Role id of the staff member who processed the loan
    pub handled_by: String,
    pub fine_amount: Option<Decimal>,
    pub fine_paid: Option<bool>,
    /// Last time the fine was assessed
    pub fine_due_date: Option<DateTime<Utc>>,
    pub renewal_count: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LoanRecord {
    /// Build the record inserted for a freshly validated loan
    pub fn open(new: NewLoan, now: DateTime<Utc>) -> Self {
        Self {
            id: LoanId::generate(),
            user_id: new.user_id,
            book_id: new.book_id,
            borrow_date: new.borrow_date,
            due_date: new.due_date,
            return_date: None,
            is_borrowed: true,
            handled_by: new.handled_by,
            fine_amount: None,
            fine_paid: None,
            fine_due_date: None,
            renewal_count: Some(0),
            created_at: now,
            updated_at: now,
        }
    }

    /// The single overdue rule: active and strictly past the due date.
    pub fn is_overdue_at(&self, now: DateTime<Utc>) -> bool {
        self.is_borrowed && now > self.due_date
    }

    /// Stored fine, absent counted as zero
    pub fn fine_or_zero(&self) -> Decimal {
        self.fine_amount.unwrap_or(Decimal::ZERO)
    }

    /// Apply a patch in place (used by stores that keep records in memory)
    pub fn apply(&mut self, patch: &LoanPatch, now: DateTime<Utc>) {
        if let Some(due_date) = patch.due_date {
            self.due_date = due_date;
        }
        if self.return_date.is_none() {
            self.return_date = patch.return_date;
        }
        if let Some(is_borrowed) = patch.is_borrowed {
            self.is_borrowed = is_borrowed;
        }
        if let Some(fine_amount) = patch.fine_amount {
            self.fine_amount = Some(fine_amount);
        }
        if let Some(fine_paid) = patch.fine_paid {
            self.fine_paid = Some(fine_paid);
        }
        if let Some(fine_due_date) = patch.fine_due_date {
            self.fine_due_date = Some(fine_due_date);
        }
        if let Some(renewal_count) = patch.renewal_count {
            self.renewal_count = Some(renewal_count);
        }
        self.updated_at = now;
    }
}

/// Partial update of a loan record. Only the services build these.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoanPatch {
    pub due_date: Option<DateTime<Utc>>,
    pub return_date: Option<DateTime<Utc>>,
    pub is_borrowed: Option<bool>,
    pub fine_amount: Option<Decimal>,
    pub fine_paid: Option<bool>,
    pub fine_due_date: Option<DateTime<Utc>>,
    pub renewal_count: Option<i32>,
}

/// Validated loan creation input
#[derive(Debug, Clone, PartialEq)]
pub struct NewLoan {
    pub user_id: UserRef,
    pub book_id: BookRef,
    pub borrow_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub handled_by: String,
}

/// Create loan request, as received from the client. Fields stay loosely
/// typed so a wrong JSON type is reported like any other violation.
#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct CreateLoanRequest {
    /// Borrower id (24 hexadecimal characters)
    #[schema(value_type = Option<String>)]
    #[validate(required(message = "user_id is required"))]
    pub user_id: Option<Value>,
    /// Book id
    #[schema(value_type = Option<String>)]
    #[validate(required(message = "book_id is required"))]
    pub book_id: Option<Value>,
    /// Borrow date (RFC 3339 or YYYY-MM-DD)
    #[schema(value_type = Option<String>)]
    #[validate(required(message = "borrow_date is required"))]
    pub borrow_date: Option<Value>,
    /// Due date (RFC 3339 or YYYY-MM-DD)
    #[schema(value_type = Option<String>)]
    #[validate(required(message = "due_date is required"))]
    pub due_date: Option<Value>,
    /// Filled from the authenticated caller by the HTTP layer
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    #[validate(required(message = "handled_by is required"))]
    pub handled_by: Option<Value>,
}

impl CreateLoanRequest {
    /// Check every field and return the typed loan, or all violations at once.
    pub fn into_new_loan(self) -> AppResult<NewLoan> {
        let mut reasons: Vec<String> = Vec::new();

        if let Err(errors) = self.validate() {
            let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
            fields.sort_by_key(|(field, _)| *field);
            for (_, field_errors) in fields {
                for error in field_errors {
                    if let Some(message) = &error.message {
                        reasons.push(message.to_string());
                    }
                }
            }
        }

        let user_id = match text_field("user_id", &self.user_id, &mut reasons) {
            Some(raw) => {
                let parsed = UserRef::parse(raw);
                if parsed.is_none() {
                    reasons.push("user_id must be a valid 24-char hex string".to_string());
                }
                parsed
            }
            None => None,
        };

        let book_id = match text_field("book_id", &self.book_id, &mut reasons) {
            Some(raw) => {
                let parsed = BookRef::parse(raw);
                if parsed.is_none() {
                    reasons.push("book_id must not be empty".to_string());
                }
                parsed
            }
            None => None,
        };

        let borrow_date = parse_date_field("borrow_date", &self.borrow_date, &mut reasons);
        let due_date = parse_date_field("due_date", &self.due_date, &mut reasons);

        if let (Some(borrow), Some(due)) = (borrow_date, due_date) {
            if due <= borrow {
                reasons.push("due_date must be after borrow_date".to_string());
            }
        }

        let handler = text_field("handled_by", &self.handled_by, &mut reasons);
        let handled_by = match handler.map(str::trim) {
            Some("") => {
                reasons.push("handled_by must not be empty".to_string());
                None
            }
            Some(handler) => Some(handler.to_string()),
            None => None,
        };

        match (user_id, book_id, borrow_date, due_date, handled_by) {
            (Some(user_id), Some(book_id), Some(borrow_date), Some(due_date), Some(handled_by))
                if reasons.is_empty() =>
            {
                Ok(NewLoan {
                    user_id,
                    book_id,
                    borrow_date,
                    due_date,
                    handled_by,
                })
            }
            _ => Err(AppError::Validation(reasons)),
        }
    }
}

/// The string held by a request field. Any other JSON type is a violation.
fn text_field<'a>(
    field: &str,
    raw: &'a Option<Value>,
    reasons: &mut Vec<String>,
) -> Option<&'a str> {
    match raw {
        Some(Value::String(text)) => Some(text),
        Some(_) => {
            reasons.push(format!("{} must be a string", field));
            None
        }
        None => None,
    }
}

fn parse_date_field(
    field: &str,
    raw: &Option<Value>,
    reasons: &mut Vec<String>,
) -> Option<DateTime<Utc>> {
    let raw = text_field(field, raw, reasons)?;
    let parsed = parse_timestamp(raw);
    if parsed.is_none() {
        reasons.push(format!("{} must be a valid date", field));
    }
    parsed
}

/// Accept RFC 3339 timestamps or plain dates (midnight UTC)
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Extend loan request
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ExtendLoanRequest {
    /// Number of calendar days to add (defaults to the configured value)
    pub extend_days: Option<i64>,
}

/// Filter on loan listings
#[derive(Debug, Clone, Default)]
pub struct LoanFilter {
    pub user_id: Option<UserRef>,
    pub is_borrowed: Option<bool>,
}

impl LoanFilter {
    pub fn matches(&self, record: &LoanRecord) -> bool {
        self.user_id.as_ref().map_or(true, |u| *u == record.user_id)
            && self.is_borrowed.map_or(true, |b| b == record.is_borrowed)
    }
}

/// Sortable columns
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LoanSortBy {
    #[default]
    BorrowDate,
    DueDate,
    ReturnDate,
    FineAmount,
    RenewalCount,
}

impl LoanSortBy {
    pub fn column(&self) -> &'static str {
        match self {
            LoanSortBy::BorrowDate => "borrow_date",
            LoanSortBy::DueDate => "due_date",
            LoanSortBy::ReturnDate => "return_date",
            LoanSortBy::FineAmount => "fine_amount",
            LoanSortBy::RenewalCount => "renewal_count",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn keyword(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoanSort {
    pub by: LoanSortBy,
    pub order: SortOrder,
}

/// Resolved page window (1-based page)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub per_page: i64,
}

impl PageRequest {
    pub fn new(page: Option<i64>, per_page: Option<i64>, default_size: i64, max_size: i64) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page.unwrap_or(default_size).clamp(1, max_size.max(1)),
        }
    }

    /// Rows to skip; saturates so a page far past the end is simply empty
    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.per_page)
    }
}

/// Query parameters for loan listings
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
pub struct LoanQuery {
    /// Filter by borrower
    pub user_id: Option<String>,
    /// Filter by active (true) or returned (false)
    pub is_borrowed: Option<bool>,
    /// Page number (1-based)
    pub page: Option<i64>,
    /// Items per page
    pub per_page: Option<i64>,
    pub sort_by: Option<LoanSortBy>,
    pub sort_order: Option<SortOrder>,
}

impl LoanQuery {
    pub fn filter(&self) -> AppResult<LoanFilter> {
        let user_id = match self.user_id.as_deref() {
            Some(raw) => Some(UserRef::parse(raw).ok_or_else(|| {
                AppError::Validation(vec!["user_id must be a valid 24-char hex string".to_string()])
            })?),
            None => None,
        };
        Ok(LoanFilter {
            user_id,
            is_borrowed: self.is_borrowed,
        })
    }

    pub fn sort(&self) -> LoanSort {
        LoanSort {
            by: self.sort_by.unwrap_or_default(),
            order: self.sort_order.unwrap_or_default(),
        }
    }
}

/// Pagination metadata
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Pagination {
    pub page: i64,
    pub per_page: i64,
    pub total: i64,
    pub total_pages: i64,
}

impl Pagination {
    pub fn new(page: &PageRequest, total: i64) -> Self {
        Self {
            page: page.page,
            per_page: page.per_page,
            total,
            total_pages: (total + page.per_page - 1) / page.per_page,
        }
    }
}

/// Loan joined with book, borrower and handler summaries
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LoanDetails {
    #[serde(flatten)]
    pub loan: LoanRecord,
    /// Placeholder ("unknown") when the book no longer resolves
    pub book: BookSummary,
    pub user: Option<UserSummary>,
    pub handler: Option<HandlerSummary>,
    pub is_overdue: bool,
}

/// Loan counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct LoanStats {
    pub total: i64,
    pub active: i64,
    pub returned: i64,
    pub overdue: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn request() -> CreateLoanRequest {
        CreateLoanRequest {
            user_id: Some("65a1f0c2e4b0a1b2c3d4e5f6".into()),
            book_id: Some("bk-1".into()),
            borrow_date: Some("2024-01-01".into()),
            due_date: Some("2024-01-15T00:00:00Z".into()),
            handled_by: Some("r2".into()),
        }
    }

    #[test]
    fn test_valid_request_becomes_new_loan() {
        let loan = request().into_new_loan().unwrap();
        assert_eq!(loan.user_id.as_str(), "65a1f0c2e4b0a1b2c3d4e5f6");
        assert_eq!(loan.borrow_date, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(loan.due_date, Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_empty_request_reports_every_missing_field() {
        let err = CreateLoanRequest::default().into_new_loan().unwrap_err();
        match err {
            AppError::Validation(reasons) => {
                assert_eq!(reasons.len(), 5);
                assert!(reasons.contains(&"user_id is required".to_string()));
                assert!(reasons.contains(&"book_id is required".to_string()));
                assert!(reasons.contains(&"borrow_date is required".to_string()));
                assert!(reasons.contains(&"due_date is required".to_string()));
                assert!(reasons.contains(&"handled_by is required".to_string()));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_fields_are_all_reported() {
        let req = CreateLoanRequest {
            user_id: Some("nope".into()),
            borrow_date: Some("yesterday".into()),
            handled_by: Some("  ".into()),
            ..request()
        };
        match req.into_new_loan().unwrap_err() {
            AppError::Validation(reasons) => {
                assert_eq!(
                    reasons,
                    vec![
                        "user_id must be a valid 24-char hex string".to_string(),
                        "borrow_date must be a valid date".to_string(),
                        "handled_by must not be empty".to_string(),
                    ]
                );
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_wrong_json_types_are_reported_per_field() {
        let req: CreateLoanRequest = serde_json::from_value(json!({
            "user_id": 123,
            "book_id": 7,
            "borrow_date": "2024-01-01",
            "due_date": ["2024-01-15"],
            "handled_by": "r2",
        }))
        .unwrap();
        match req.into_new_loan().unwrap_err() {
            AppError::Validation(reasons) => {
                assert_eq!(
                    reasons,
                    vec![
                        "user_id must be a string".to_string(),
                        "book_id must be a string".to_string(),
                        "due_date must be a string".to_string(),
                    ]
                );
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_null_field_counts_as_missing() {
        let req: CreateLoanRequest = serde_json::from_value(json!({
            "user_id": null,
            "book_id": "bk-1",
            "borrow_date": "2024-01-01",
            "due_date": "2024-01-15",
            "handled_by": "r2",
        }))
        .unwrap();
        match req.into_new_loan().unwrap_err() {
            AppError::Validation(reasons) => {
                assert_eq!(reasons, vec!["user_id is required".to_string()]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_due_date_must_follow_borrow_date() {
        let req = CreateLoanRequest {
            due_date: Some("2024-01-01".into()),
            ..request()
        };
        match req.into_new_loan().unwrap_err() {
            AppError::Validation(reasons) => {
                assert_eq!(reasons, vec!["due_date must be after borrow_date".to_string()]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_overdue_boundary() {
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let mut record = LoanRecord::open(request().into_new_loan().unwrap(), now);
        assert!(!record.is_overdue_at(now));
        assert!(record.is_overdue_at(now + chrono::Duration::seconds(1)));
        record.is_borrowed = false;
        assert!(!record.is_overdue_at(now + chrono::Duration::days(3)));
    }

    #[test]
    fn test_page_request_is_clamped() {
        let page = PageRequest::new(Some(0), Some(500), 10, 100);
        assert_eq!(page, PageRequest { page: 1, per_page: 100 });
        assert_eq!(PageRequest::new(Some(3), None, 10, 100).offset(), 20);
        assert_eq!(PageRequest::new(Some(i64::MAX), Some(50), 10, 100).offset(), i64::MAX);
        assert_eq!(Pagination::new(&PageRequest::new(None, Some(10), 10, 100), 21).total_pages, 3);
    }
}
