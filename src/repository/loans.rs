//! Loans repository for PostgreSQL
//!
//! The one-active-loan rule is backed by the partial unique index
//! `borrowings_one_active_per_user_book`; book rows are locked `FOR UPDATE`
//! inside loan transactions so two desks cannot both see a book as available.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, FromRow, PgConnection, Pool, Postgres, Row, Transaction};

use super::{BookAvailability, LoanStore, LoanTransaction};
use crate::{
    error::{AppError, AppResult},
    models::{
        BookRef, BookSummary, HandlerSummary, LoanDetails, LoanFilter, LoanId, LoanPatch,
        LoanRecord, LoanSort, PageRequest, UserRef, UserSummary,
    },
};

const ACTIVE_LOAN_INDEX: &str = "borrowings_one_active_per_user_book";

#[derive(Clone)]
pub struct PgLoanStore {
    pool: Pool<Postgres>,
}

impl PgLoanStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

/// WHERE clause for a loan filter, with `$n` placeholders starting at 1
fn filter_clause(filter: &LoanFilter, alias: &str) -> String {
    let mut conditions = Vec::new();
    let mut idx = 1;

    if filter.user_id.is_some() {
        conditions.push(format!("{}user_id = ${}", alias, idx));
        idx += 1;
    }
    if filter.is_borrowed.is_some() {
        conditions.push(format!("{}is_borrowed = ${}", alias, idx));
    }

    if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    }
}

macro_rules! bind_filter {
    ($builder:expr, $filter:expr) => {{
        let mut builder = $builder;
        if let Some(ref user_id) = $filter.user_id {
            builder = builder.bind(user_id);
        }
        if let Some(is_borrowed) = $filter.is_borrowed {
            builder = builder.bind(is_borrowed);
        }
        builder
    }};
}

fn details_from_row(row: &PgRow, now: DateTime<Utc>) -> AppResult<LoanDetails> {
    let loan = LoanRecord::from_row(row)?;

    let book_ref: Option<String> = row.try_get("book_ref")?;
    let book = match book_ref {
        Some(id) => BookSummary {
            id: Some(id),
            title: row.try_get("book_title")?,
            author: row.try_get("book_author")?,
            cover_image: row.try_get("book_cover_image")?,
            genres: row.try_get("book_genres")?,
        },
        None => BookSummary::placeholder(),
    };

    let user_ref: Option<UserRef> = row.try_get("user_ref")?;
    let user = match user_ref {
        Some(id) => Some(UserSummary {
            id,
            name: row.try_get("user_name")?,
            email: row.try_get("user_email")?,
        }),
        None => None,
    };

    let role_ref: Option<String> = row.try_get("role_ref")?;
    let handler = match role_ref {
        Some(id) => Some(HandlerSummary {
            id,
            name: row.try_get("role_name")?,
        }),
        None => None,
    };

    Ok(LoanDetails {
        is_overdue: loan.is_overdue_at(now),
        loan,
        book,
        user,
        handler,
    })
}

#[async_trait]
impl LoanStore for PgLoanStore {
    async fn begin(&self) -> AppResult<Box<dyn LoanTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgLoanTransaction { tx: Some(tx) }))
    }

    /// Get loan by ID
    async fn find_by_id(&self, id: LoanId) -> AppResult<LoanRecord> {
        sqlx::query_as::<_, LoanRecord>("SELECT * FROM borrowings WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Loan {} not found", id)))
    }

    async fn find_all(
        &self,
        filter: &LoanFilter,
        page: &PageRequest,
        sort: &LoanSort,
    ) -> AppResult<(Vec<LoanRecord>, i64)> {
        let where_clause = filter_clause(filter, "");

        let count_q = format!("SELECT COUNT(*) FROM borrowings {}", where_clause);
        let total = bind_filter!(sqlx::query_scalar::<_, i64>(&count_q), filter)
            .fetch_one(&self.pool)
            .await?;

        // Sort column and direction come from closed enums, never from input text
        let select_q = format!(
            "SELECT * FROM borrowings {} ORDER BY {} {} NULLS LAST, id LIMIT {} OFFSET {}",
            where_clause,
            sort.by.column(),
            sort.order.keyword(),
            page.per_page,
            page.offset()
        );
        let rows = bind_filter!(sqlx::query_as::<_, LoanRecord>(&select_q), filter)
            .fetch_all(&self.pool)
            .await?;

        Ok((rows, total))
    }

    async fn find_with_details(
        &self,
        filter: &LoanFilter,
        page: &PageRequest,
        now: DateTime<Utc>,
    ) -> AppResult<(Vec<LoanDetails>, i64)> {
        let where_clause = filter_clause(filter, "l.");

        let count_q = format!("SELECT COUNT(*) FROM borrowings l {}", where_clause);
        let total = bind_filter!(sqlx::query_scalar::<_, i64>(&count_q), filter)
            .fetch_one(&self.pool)
            .await?;

        let select_q = format!(
            r#"
            SELECT l.*,
                   b.id AS book_ref, b.title AS book_title, b.author AS book_author,
                   b.cover_image AS book_cover_image, b.genres AS book_genres,
                   u.id AS user_ref, u.name AS user_name, u.email AS user_email,
                   r.id AS role_ref, r.name AS role_name
            FROM borrowings l
            LEFT JOIN books b ON b.id = l.book_id
            LEFT JOIN users u ON u.id = l.user_id
            LEFT JOIN roles r ON r.id = l.handled_by
            {}
            ORDER BY l.borrow_date DESC, l.id
            LIMIT {} OFFSET {}
            "#,
            where_clause,
            page.per_page,
            page.offset()
        );
        let rows = bind_filter!(sqlx::query(&select_q), filter)
            .fetch_all(&self.pool)
            .await?;

        let details = rows
            .iter()
            .map(|row| details_from_row(row, now))
            .collect::<AppResult<Vec<_>>>()?;

        Ok((details, total))
    }

    async fn find_by_user(&self, user: &UserRef) -> AppResult<Vec<LoanRecord>> {
        let loans = sqlx::query_as::<_, LoanRecord>(
            "SELECT * FROM borrowings WHERE user_id = $1 ORDER BY borrow_date DESC, id",
        )
        .bind(user)
        .fetch_all(&self.pool)
        .await?;
        Ok(loans)
    }

    async fn find_active(&self) -> AppResult<Vec<LoanRecord>> {
        let loans = sqlx::query_as::<_, LoanRecord>(
            "SELECT * FROM borrowings WHERE is_borrowed ORDER BY due_date, id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(loans)
    }

    async fn count(&self, filter: &LoanFilter) -> AppResult<i64> {
        let count_q = format!("SELECT COUNT(*) FROM borrowings {}", filter_clause(filter, ""));
        let count = bind_filter!(sqlx::query_scalar::<_, i64>(&count_q), filter)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Loan transaction over a pooled connection
pub struct PgLoanTransaction {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgLoanTransaction {
    fn conn(&mut self) -> AppResult<&mut PgConnection> {
        match self.tx.as_mut() {
            Some(tx) => Ok(&mut **tx),
            None => Err(AppError::Internal("transaction already committed".to_string())),
        }
    }
}

#[async_trait]
impl BookAvailability for PgLoanTransaction {
    async fn exists(&mut self, book: &BookRef) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM books WHERE id = $1)")
            .bind(book)
            .fetch_one(self.conn()?)
            .await?;
        Ok(exists)
    }

    async fn is_available(&mut self, book: &BookRef) -> AppResult<bool> {
        sqlx::query_scalar::<_, bool>("SELECT is_available FROM books WHERE id = $1 FOR UPDATE")
            .bind(book)
            .fetch_optional(self.conn()?)
            .await?
            .ok_or_else(|| AppError::NotFound("book".to_string()))
    }

    async fn set_available(&mut self, book: &BookRef, available: bool) -> AppResult<bool> {
        let result = sqlx::query("UPDATE books SET is_available = $2 WHERE id = $1")
            .bind(book)
            .bind(available)
            .execute(self.conn()?)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl LoanTransaction for PgLoanTransaction {
    async fn lock_loan(&mut self, id: LoanId) -> AppResult<Option<LoanRecord>> {
        let loan = sqlx::query_as::<_, LoanRecord>("SELECT * FROM borrowings WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(self.conn()?)
            .await?;
        Ok(loan)
    }

    async fn find_active_for(
        &mut self,
        user: &UserRef,
        book: &BookRef,
    ) -> AppResult<Option<LoanRecord>> {
        let loan = sqlx::query_as::<_, LoanRecord>(
            "SELECT * FROM borrowings WHERE user_id = $1 AND book_id = $2 AND is_borrowed",
        )
        .bind(user)
        .bind(book)
        .fetch_optional(self.conn()?)
        .await?;
        Ok(loan)
    }

    async fn insert(&mut self, record: &LoanRecord) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO borrowings (
                id, user_id, book_id, borrow_date, due_date, return_date, is_borrowed,
                handled_by, fine_amount, fine_paid, fine_due_date, renewal_count,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(record.id)
        .bind(&record.user_id)
        .bind(&record.book_id)
        .bind(record.borrow_date)
        .bind(record.due_date)
        .bind(record.return_date)
        .bind(record.is_borrowed)
        .bind(&record.handled_by)
        .bind(record.fine_amount)
        .bind(record.fine_paid)
        .bind(record.fine_due_date)
        .bind(record.renewal_count)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(self.conn()?)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db))
                if db.is_unique_violation() && db.constraint() == Some(ACTIVE_LOAN_INDEX) =>
            {
                Err(AppError::Conflict("already borrowed by this user".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update(
        &mut self,
        id: LoanId,
        patch: &LoanPatch,
        now: DateTime<Utc>,
    ) -> AppResult<LoanRecord> {
        let mut sets = vec!["updated_at = $2".to_string()];
        let mut idx = 3;

        macro_rules! add_f {
            ($field:expr, $name:expr) => {
                if $field.is_some() {
                    sets.push(format!("{} = ${}", $name, idx));
                    idx += 1;
                }
            };
        }

        add_f!(patch.due_date, "due_date");
        if patch.return_date.is_some() {
            // return_date is written once and never replaced
            sets.push(format!("return_date = COALESCE(return_date, ${})", idx));
            idx += 1;
        }
        add_f!(patch.is_borrowed, "is_borrowed");
        add_f!(patch.fine_amount, "fine_amount");
        add_f!(patch.fine_paid, "fine_paid");
        add_f!(patch.fine_due_date, "fine_due_date");
        add_f!(patch.renewal_count, "renewal_count");
        let _ = idx;

        let query = format!("UPDATE borrowings SET {} WHERE id = $1 RETURNING *", sets.join(", "));

        let mut builder = sqlx::query_as::<_, LoanRecord>(&query).bind(id).bind(now);

        macro_rules! bind_f {
            ($field:expr) => {
                if let Some(val) = $field {
                    builder = builder.bind(val);
                }
            };
        }

        bind_f!(patch.due_date);
        bind_f!(patch.return_date);
        bind_f!(patch.is_borrowed);
        bind_f!(patch.fine_amount);
        bind_f!(patch.fine_paid);
        bind_f!(patch.fine_due_date);
        bind_f!(patch.renewal_count);

        builder
            .fetch_optional(self.conn()?)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Loan {} not found", id)))
    }

    async fn commit(&mut self) -> AppResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| AppError::Internal("transaction already committed".to_string()))?;
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_clause_numbers_placeholders() {
        let filter = LoanFilter {
            user_id: UserRef::parse("65a1f0c2e4b0a1b2c3d4e5f6"),
            is_borrowed: Some(true),
        };
        assert_eq!(
            filter_clause(&filter, "l."),
            "WHERE l.user_id = $1 AND l.is_borrowed = $2"
        );

        let only_status = LoanFilter {
            user_id: None,
            is_borrowed: Some(false),
        };
        assert_eq!(filter_clause(&only_status, ""), "WHERE is_borrowed = $1");
        assert_eq!(filter_clause(&LoanFilter::default(), ""), "");
    }
}
