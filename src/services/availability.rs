//! Loan creation guarded by book availability

use chrono::{DateTime, Utc};

use crate::{
    error::{AppError, AppResult},
    models::{CreateLoanRequest, LoanRecord},
    repository::Repository,
};

#[derive(Clone)]
pub struct AvailabilityGate {
    repository: Repository,
}

impl AvailabilityGate {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    /// Validate the request, then insert the loan and take the book off the
    /// shelf in one transaction.
    pub async fn create_loan(
        &self,
        request: CreateLoanRequest,
        now: DateTime<Utc>,
    ) -> AppResult<LoanRecord> {
        let new_loan = request.into_new_loan()?;

        let mut tx = self.repository.loans.begin().await?;

        if tx
            .find_active_for(&new_loan.user_id, &new_loan.book_id)
            .await?
            .is_some()
        {
            tracing::debug!(
                user_id = %new_loan.user_id,
                book_id = %new_loan.book_id,
                "Duplicate active loan rejected"
            );
            return Err(AppError::Conflict("already borrowed by this user".to_string()));
        }

        if !tx.exists(&new_loan.book_id).await? {
            return Err(AppError::NotFound("book".to_string()));
        }
        if !tx.is_available(&new_loan.book_id).await? {
            tracing::debug!(book_id = %new_loan.book_id, "Book unavailable");
            return Err(AppError::Conflict("book unavailable".to_string()));
        }

        let record = LoanRecord::open(new_loan, now);
        tx.insert(&record).await?;
        tx.set_available(&record.book_id, false).await?;
        tx.commit().await?;

        tracing::info!(
            loan_id = %record.id,
            user_id = %record.user_id,
            book_id = %record.book_id,
            due_date = %record.due_date,
            handled_by = %record.handled_by,
            "Loan created"
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BookRef, LoanFilter};
    use crate::repository::{memory::MemoryLoanStore, LoanStore};
    use chrono::TimeZone;

    const READER: &str = "65a1f0c2e4b0a1b2c3d4e5f6";

    fn request(user: &str, book: &str) -> CreateLoanRequest {
        CreateLoanRequest {
            user_id: Some(user.into()),
            book_id: Some(book.into()),
            borrow_date: Some("2024-01-01".into()),
            due_date: Some("2024-01-15".into()),
            handled_by: Some("r2".into()),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()
    }

    async fn setup() -> (AvailabilityGate, MemoryLoanStore) {
        let store = MemoryLoanStore::new();
        store
            .add_book(&BookRef::parse("bk-1").unwrap(), "Dune", "Frank Herbert", &["sf"], true)
            .await;
        (AvailabilityGate::new(Repository::memory(store.clone())), store)
    }

    #[tokio::test]
    async fn test_create_loan_takes_book_off_shelf() {
        let (gate, store) = setup().await;

        let record = gate.create_loan(request(READER, "bk-1"), now()).await.unwrap();

        assert!(record.is_borrowed);
        assert_eq!(record.renewal_count, Some(0));
        assert_eq!(record.created_at, now());
        assert_eq!(store.find_by_id(record.id).await.unwrap(), record);
        assert_eq!(
            store.book_available(&BookRef::parse("bk-1").unwrap()).await,
            Some(false)
        );
    }

    #[tokio::test]
    async fn test_second_loan_same_user_and_book_conflicts() {
        let (gate, store) = setup().await;
        gate.create_loan(request(READER, "bk-1"), now()).await.unwrap();

        match gate.create_loan(request(READER, "bk-1"), now()).await.unwrap_err() {
            AppError::Conflict(msg) => assert_eq!(msg, "already borrowed by this user"),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(store.count(&LoanFilter::default()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_book_conflicts() {
        let (gate, _) = setup().await;
        gate.create_loan(request(READER, "bk-1"), now()).await.unwrap();

        let err = gate
            .create_loan(request("000000000000000000000001", "bk-1"), now())
            .await
            .unwrap_err();
        match err {
            AppError::Conflict(msg) => assert_eq!(msg, "book unavailable"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_book_not_found() {
        let (gate, store) = setup().await;

        let err = gate.create_loan(request(READER, "bk-404"), now()).await.unwrap_err();

        assert!(matches!(err, AppError::NotFound(ref what) if what == "book"));
        assert_eq!(store.count(&LoanFilter::default()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_invalid_request_touches_nothing() {
        let (gate, store) = setup().await;

        let err = gate
            .create_loan(CreateLoanRequest::default(), now())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Validation(ref reasons) if reasons.len() == 5));
        assert_eq!(
            store.book_available(&BookRef::parse("bk-1").unwrap()).await,
            Some(true)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_yield_one_loan() {
        let (gate, store) = setup().await;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = gate.clone();
                tokio::spawn(async move { gate.create_loan(request(READER, "bk-1"), now()).await })
            })
            .collect();

        let mut created = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => created += 1,
                Err(err) => assert!(matches!(err, AppError::Conflict(_))),
            }
        }

        assert_eq!(created, 1);
        assert_eq!(store.count(&LoanFilter::default()).await.unwrap(), 1);
    }
}
