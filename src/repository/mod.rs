//! Repository layer: the loan store interface and its backends
//!
//! Services never reach for a database handle directly; they receive a
//! [`Repository`] holding an injected [`LoanStore`]. Every write that must stay
//! consistent with the book availability flag goes through a
//! [`LoanTransaction`], so the loan row and the book row change together or
//! not at all.

pub mod loans;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use sqlx::{Pool, Postgres};

use crate::{
    error::AppResult,
    models::{
        BookRef, LoanDetails, LoanFilter, LoanId, LoanPatch, LoanRecord, LoanSort, PageRequest,
        UserRef,
    },
};

/// Book-side operations consumed by the loan desk
#[async_trait]
pub trait BookAvailability: Send {
    /// Whether the catalog knows this book
    async fn exists(&mut self, book: &BookRef) -> AppResult<bool>;

    /// Current availability flag; `NotFound` for an unknown book
    async fn is_available(&mut self, book: &BookRef) -> AppResult<bool>;

    /// Flip the availability flag. Returns false when the book no longer exists.
    async fn set_available(&mut self, book: &BookRef, available: bool) -> AppResult<bool>;
}

/// Unit of work over loans and book availability.
///
/// Dropping a transaction without calling [`LoanTransaction::commit`] discards
/// every change made through it.
#[async_trait]
pub trait LoanTransaction: BookAvailability {
    /// Read a loan and hold it until commit
    async fn lock_loan(&mut self, id: LoanId) -> AppResult<Option<LoanRecord>>;

    /// The active loan of this user on this book, if any
    async fn find_active_for(
        &mut self,
        user: &UserRef,
        book: &BookRef,
    ) -> AppResult<Option<LoanRecord>>;

    /// Insert a new record. A second active loan for the same user and book
    /// is rejected with `Conflict`.
    async fn insert(&mut self, record: &LoanRecord) -> AppResult<()>;

    /// Apply a partial update stamped at `now` and return the stored record
    async fn update(
        &mut self,
        id: LoanId,
        patch: &LoanPatch,
        now: DateTime<Utc>,
    ) -> AppResult<LoanRecord>;

    async fn commit(&mut self) -> AppResult<()>;
}

/// Loan record store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LoanStore: Send + Sync {
    /// Open a unit of work
    async fn begin(&self) -> AppResult<Box<dyn LoanTransaction>>;

    /// `NotFound` when absent
    async fn find_by_id(&self, id: LoanId) -> AppResult<LoanRecord>;

    /// Filtered, sorted page of records plus the total count for the filter
    async fn find_all(
        &self,
        filter: &LoanFilter,
        page: &PageRequest,
        sort: &LoanSort,
    ) -> AppResult<(Vec<LoanRecord>, i64)>;

    /// Page of records joined with book, user and handler summaries, most
    /// recent borrow first, overdue flags taken at `now`. Unresolvable books
    /// get a placeholder summary.
    async fn find_with_details(
        &self,
        filter: &LoanFilter,
        page: &PageRequest,
        now: DateTime<Utc>,
    ) -> AppResult<(Vec<LoanDetails>, i64)>;

    /// Every record of a user, most recent borrow first
    async fn find_by_user(&self, user: &UserRef) -> AppResult<Vec<LoanRecord>>;

    /// Every active record
    async fn find_active(&self) -> AppResult<Vec<LoanRecord>>;

    async fn count(&self, filter: &LoanFilter) -> AppResult<i64>;

    /// Storage round trip for readiness probes
    async fn ping(&self) -> AppResult<()>;
}

/// Main repository struct holding the injected store
#[derive(Clone)]
pub struct Repository {
    pub loans: Arc<dyn LoanStore>,
}

impl Repository {
    pub fn new(loans: Arc<dyn LoanStore>) -> Self {
        Self { loans }
    }

    /// PostgreSQL-backed repository
    pub fn postgres(pool: Pool<Postgres>) -> Self {
        Self::new(Arc::new(loans::PgLoanStore::new(pool)))
    }

    /// In-memory repository sharing state with `store`
    pub fn memory(store: memory::MemoryLoanStore) -> Self {
        Self::new(Arc::new(store))
    }
}
