//! Loan return

use chrono::{DateTime, Utc};

use crate::{
    error::{AppError, AppResult},
    models::{LoanId, LoanPatch, LoanRecord},
    repository::Repository,
};

#[derive(Clone)]
pub struct ReturnProcessor {
    repository: Repository,
}

impl ReturnProcessor {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    /// Close an active loan and put the book back on the shelf, atomically
    pub async fn return_loan(&self, id: LoanId, now: DateTime<Utc>) -> AppResult<LoanRecord> {
        let mut tx = self.repository.loans.begin().await?;
        let current = tx
            .lock_loan(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Loan {} not found", id)))?;

        if !current.is_borrowed {
            tracing::debug!(loan_id = %id, "Return of closed loan rejected");
            return Err(AppError::Conflict("already returned".to_string()));
        }

        let patch = LoanPatch {
            is_borrowed: Some(false),
            return_date: Some(now),
            ..Default::default()
        };
        let updated = tx.update(id, &patch, now).await?;

        if !tx.set_available(&updated.book_id, true).await? {
            tracing::warn!(
                loan_id = %id,
                book_id = %updated.book_id,
                "Returned book is no longer in the catalog"
            );
        }
        tx.commit().await?;

        tracing::info!(
            loan_id = %id,
            user_id = %updated.user_id,
            book_id = %updated.book_id,
            "Loan returned"
        );
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BookRef, NewLoan, UserRef};
    use crate::repository::{memory::MemoryLoanStore, LoanStore};
    use chrono::{Duration, TimeZone};

    fn book() -> BookRef {
        BookRef::parse("bk-1").unwrap()
    }

    fn loan() -> LoanRecord {
        let borrow = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        LoanRecord::open(
            NewLoan {
                user_id: UserRef::parse("65a1f0c2e4b0a1b2c3d4e5f6").unwrap(),
                book_id: book(),
                borrow_date: borrow,
                due_date: borrow + Duration::days(14),
                handled_by: "r2".to_string(),
            },
            borrow,
        )
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap()
    }

    async fn setup(record: &LoanRecord, available: bool) -> (ReturnProcessor, MemoryLoanStore) {
        let store = MemoryLoanStore::new();
        store.add_book(&book(), "Dune", "Frank Herbert", &[], available).await;
        store.put_record(record.clone()).await;
        (ReturnProcessor::new(Repository::memory(store.clone())), store)
    }

    #[tokio::test]
    async fn test_return_closes_loan_and_restores_book() {
        let record = loan();
        let (returns, store) = setup(&record, false).await;

        let closed = returns.return_loan(record.id, now()).await.unwrap();

        assert!(!closed.is_borrowed);
        assert_eq!(closed.return_date, Some(now()));
        assert_eq!(closed.updated_at, now());
        assert_eq!(store.book_available(&book()).await, Some(true));
    }

    #[tokio::test]
    async fn test_second_return_conflicts_without_touching_book() {
        let record = loan();
        let (returns, store) = setup(&record, false).await;
        returns.return_loan(record.id, now()).await.unwrap();

        // someone else borrowed the copy in the meantime
        store.add_book(&book(), "Dune", "Frank Herbert", &[], false).await;

        match returns.return_loan(record.id, now()).await.unwrap_err() {
            AppError::Conflict(msg) => assert_eq!(msg, "already returned"),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(store.book_available(&book()).await, Some(false));
        let stored = store.find_by_id(record.id).await.unwrap();
        assert_eq!(stored.return_date, Some(now()));
    }

    #[tokio::test]
    async fn test_return_of_removed_book_still_closes_loan() {
        let record = loan();
        let (returns, store) = setup(&record, false).await;
        store.remove_book(&book()).await;

        let closed = returns.return_loan(record.id, now()).await.unwrap();
        assert!(!closed.is_borrowed);
        assert_eq!(store.book_available(&book()).await, None);
    }

    #[tokio::test]
    async fn test_return_unknown_loan() {
        let (returns, _) = setup(&loan(), false).await;
        let err = returns.return_loan(LoanId(7), now()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
