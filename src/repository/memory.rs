//! In-memory loan store
//!
//! Backs development runs and the test suite. A transaction holds the single
//! state lock from `begin` until it is committed or dropped, so transactions
//! are fully serialized and the one-active-loan rule cannot race.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{BookAvailability, LoanStore, LoanTransaction};
use crate::{
    error::{AppError, AppResult},
    models::{
        loan::{LoanSortBy, SortOrder}, BookRef, BookSummary, HandlerSummary, LoanDetails, LoanFilter, LoanId,
        LoanPatch, LoanRecord, LoanSort, PageRequest, UserRef, UserSummary,
    },
};

#[derive(Debug, Clone)]
struct BookEntry {
    summary: BookSummary,
    available: bool,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    loans: BTreeMap<LoanId, LoanRecord>,
    books: HashMap<BookRef, BookEntry>,
    users: HashMap<UserRef, UserSummary>,
    roles: HashMap<String, HandlerSummary>,
}

impl MemoryState {
    fn details(&self, loan: &LoanRecord, now: DateTime<Utc>) -> LoanDetails {
        LoanDetails {
            book: self
                .books
                .get(&loan.book_id)
                .map(|b| b.summary.clone())
                .unwrap_or_else(BookSummary::placeholder),
            user: self.users.get(&loan.user_id).cloned(),
            handler: self.roles.get(&loan.handled_by).cloned(),
            is_overdue: loan.is_overdue_at(now),
            loan: loan.clone(),
        }
    }

    fn filtered(&self, filter: &LoanFilter) -> Vec<&LoanRecord> {
        self.loans.values().filter(|l| filter.matches(l)).collect()
    }
}

/// Shared in-memory store; clones see the same data
#[derive(Clone, Default)]
pub struct MemoryLoanStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryLoanStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a catalog book
    pub async fn add_book(
        &self,
        book: &BookRef,
        title: &str,
        author: &str,
        genres: &[&str],
        available: bool,
    ) {
        let summary = BookSummary {
            id: Some(book.to_string()),
            title: title.to_string(),
            author: author.to_string(),
            cover_image: None,
            genres: genres.iter().map(|g| g.to_string()).collect(),
        };
        self.state
            .lock()
            .await
            .books
            .insert(book.clone(), BookEntry { summary, available });
    }

    /// Drop a book from the catalog (loans pointing at it are kept)
    pub async fn remove_book(&self, book: &BookRef) {
        self.state.lock().await.books.remove(book);
    }

    /// Availability flag of a book, `None` when unknown
    pub async fn book_available(&self, book: &BookRef) -> Option<bool> {
        self.state.lock().await.books.get(book).map(|b| b.available)
    }

    pub async fn add_user(&self, user: UserSummary) {
        self.state.lock().await.users.insert(user.id.clone(), user);
    }

    pub async fn add_role(&self, id: &str, name: &str) {
        self.state.lock().await.roles.insert(
            id.to_string(),
            HandlerSummary {
                id: id.to_string(),
                name: name.to_string(),
            },
        );
    }

    /// Store a record as-is, bypassing the loan desk rules (fixtures, imports)
    pub async fn put_record(&self, record: LoanRecord) {
        self.state.lock().await.loans.insert(record.id, record);
    }
}

fn sort_records(records: &mut [&LoanRecord], sort: &LoanSort) {
    records.sort_by(|a, b| {
        let ordering = match sort.by {
            LoanSortBy::BorrowDate => a.borrow_date.cmp(&b.borrow_date),
            LoanSortBy::DueDate => a.due_date.cmp(&b.due_date),
            LoanSortBy::ReturnDate => a.return_date.cmp(&b.return_date),
            LoanSortBy::FineAmount => a.fine_amount.cmp(&b.fine_amount),
            LoanSortBy::RenewalCount => a.renewal_count.cmp(&b.renewal_count),
        };
        let ordering = match sort.order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        };
        ordering.then_with(|| a.id.cmp(&b.id))
    });
}

fn page_of<T: Clone>(items: &[T], page: &PageRequest) -> Vec<T> {
    items
        .iter()
        .skip(page.offset() as usize)
        .take(page.per_page as usize)
        .cloned()
        .collect()
}

#[async_trait]
impl LoanStore for MemoryLoanStore {
    async fn begin(&self) -> AppResult<Box<dyn LoanTransaction>> {
        let guard = self.state.clone().lock_owned().await;
        let working = (*guard).clone();
        Ok(Box::new(MemoryTransaction { guard, working }))
    }

    async fn find_by_id(&self, id: LoanId) -> AppResult<LoanRecord> {
        self.state
            .lock()
            .await
            .loans
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Loan {} not found", id)))
    }

    async fn find_all(
        &self,
        filter: &LoanFilter,
        page: &PageRequest,
        sort: &LoanSort,
    ) -> AppResult<(Vec<LoanRecord>, i64)> {
        let state = self.state.lock().await;
        let mut records = state.filtered(filter);
        sort_records(&mut records, sort);
        let total = records.len() as i64;
        let rows = page_of(&records, page).into_iter().cloned().collect();
        Ok((rows, total))
    }

    async fn find_with_details(
        &self,
        filter: &LoanFilter,
        page: &PageRequest,
        now: DateTime<Utc>,
    ) -> AppResult<(Vec<LoanDetails>, i64)> {
        let state = self.state.lock().await;
        let mut records = state.filtered(filter);
        sort_records(&mut records, &LoanSort::default());
        let total = records.len() as i64;
        let rows = page_of(&records, page)
            .into_iter()
            .map(|l| state.details(l, now))
            .collect();
        Ok((rows, total))
    }

    async fn find_by_user(&self, user: &UserRef) -> AppResult<Vec<LoanRecord>> {
        let state = self.state.lock().await;
        let filter = LoanFilter {
            user_id: Some(user.clone()),
            is_borrowed: None,
        };
        let mut records = state.filtered(&filter);
        sort_records(&mut records, &LoanSort::default());
        Ok(records.into_iter().cloned().collect())
    }

    async fn find_active(&self) -> AppResult<Vec<LoanRecord>> {
        let state = self.state.lock().await;
        Ok(state.loans.values().filter(|l| l.is_borrowed).cloned().collect())
    }

    async fn count(&self, filter: &LoanFilter) -> AppResult<i64> {
        Ok(self.state.lock().await.filtered(filter).len() as i64)
    }

    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }
}

/// Serialized unit of work over a private copy of the state
pub struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl BookAvailability for MemoryTransaction {
    async fn exists(&mut self, book: &BookRef) -> AppResult<bool> {
        Ok(self.working.books.contains_key(book))
    }

    async fn is_available(&mut self, book: &BookRef) -> AppResult<bool> {
        self.working
            .books
            .get(book)
            .map(|b| b.available)
            .ok_or_else(|| AppError::NotFound("book".to_string()))
    }

    async fn set_available(&mut self, book: &BookRef, available: bool) -> AppResult<bool> {
        match self.working.books.get_mut(book) {
            Some(entry) => {
                entry.available = available;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl LoanTransaction for MemoryTransaction {
    async fn lock_loan(&mut self, id: LoanId) -> AppResult<Option<LoanRecord>> {
        Ok(self.working.loans.get(&id).cloned())
    }

    async fn find_active_for(
        &mut self,
        user: &UserRef,
        book: &BookRef,
    ) -> AppResult<Option<LoanRecord>> {
        Ok(self
            .working
            .loans
            .values()
            .find(|l| l.is_borrowed && l.user_id == *user && l.book_id == *book)
            .cloned())
    }

    async fn insert(&mut self, record: &LoanRecord) -> AppResult<()> {
        if record.is_borrowed
            && self
                .find_active_for(&record.user_id, &record.book_id)
                .await?
                .is_some()
        {
            return Err(AppError::Conflict("already borrowed by this user".to_string()));
        }
        if record.due_date <= record.borrow_date {
            return Err(AppError::Validation(vec![
                "due_date must be after borrow_date".to_string(),
            ]));
        }
        self.working.loans.insert(record.id, record.clone());
        Ok(())
    }

    async fn update(
        &mut self,
        id: LoanId,
        patch: &LoanPatch,
        now: DateTime<Utc>,
    ) -> AppResult<LoanRecord> {
        let record = self
            .working
            .loans
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Loan {} not found", id)))?;
        record.apply(patch, now);
        Ok(record.clone())
    }

    async fn commit(&mut self) -> AppResult<()> {
        *self.guard = self.working.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewLoan;
    use chrono::{Duration, TimeZone};

    fn book(id: &str) -> BookRef {
        BookRef::parse(id).unwrap()
    }

    fn user() -> UserRef {
        UserRef::parse("65a1f0c2e4b0a1b2c3d4e5f6").unwrap()
    }

    fn record(book: &BookRef, day: u32) -> LoanRecord {
        let borrow = Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap();
        LoanRecord::open(
            NewLoan {
                user_id: user(),
                book_id: book.clone(),
                borrow_date: borrow,
                due_date: borrow + Duration::days(14),
                handled_by: "r2".to_string(),
            },
            borrow,
        )
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let store = MemoryLoanStore::new();
        let book = book("bk-1");
        store.add_book(&book, "Dune", "Herbert", &[], true).await;

        {
            let mut tx = store.begin().await.unwrap();
            tx.insert(&record(&book, 1)).await.unwrap();
            tx.set_available(&book, false).await.unwrap();
        }

        assert_eq!(store.count(&LoanFilter::default()).await.unwrap(), 0);
        assert_eq!(store.book_available(&book).await, Some(true));
    }

    #[tokio::test]
    async fn test_second_active_insert_conflicts() {
        let store = MemoryLoanStore::new();
        let book = book("bk-1");
        store.add_book(&book, "Dune", "Herbert", &[], true).await;

        let mut tx = store.begin().await.unwrap();
        tx.insert(&record(&book, 1)).await.unwrap();
        let err = tx.insert(&record(&book, 2)).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_details_use_placeholder_for_missing_book() {
        let store = MemoryLoanStore::new();
        let kept = book("bk-1");
        let gone = book("bk-2");
        store.add_book(&kept, "Dune", "Herbert", &["sf"], true).await;
        store.add_book(&gone, "Emma", "Austen", &[], true).await;
        store.put_record(record(&kept, 1)).await;
        store.put_record(record(&gone, 2)).await;
        store.remove_book(&gone).await;

        let (rows, total) = store
            .find_with_details(
                &LoanFilter::default(),
                &PageRequest::new(None, None, 10, 100),
                Utc.with_ymd_and_hms(2024, 1, 16, 0, 0, 0).unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(total, 2);
        // most recent borrow first
        assert!(rows[0].book.is_placeholder());
        assert_eq!(rows[0].book.title, "unknown");
        assert!(rows[0].book.genres.is_empty());
        // due exactly at the given instant
        assert!(!rows[0].is_overdue);
        assert_eq!(rows[1].book.title, "Dune");
        assert!(rows[1].is_overdue);
    }

    #[tokio::test]
    async fn test_find_all_sorts_and_pages() {
        let store = MemoryLoanStore::new();
        for day in 1..=5 {
            let id = book(&format!("bk-{}", day));
            store.add_book(&id, "T", "A", &[], true).await;
            store.put_record(record(&id, day)).await;
        }

        let sort = LoanSort {
            by: LoanSortBy::BorrowDate,
            order: SortOrder::Asc,
        };
        let (rows, total) = store
            .find_all(&LoanFilter::default(), &PageRequest::new(Some(2), Some(2), 10, 100), &sort)
            .await
            .unwrap();

        assert_eq!(total, 5);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].book_id.as_str(), "bk-3");
        assert_eq!(rows[1].book_id.as_str(), "bk-4");
    }
}
