//! Overdue detection and loan counters
//!
//! Nothing here is cached: every call derives overdue-ness from the records
//! and the instant it is given.

use chrono::{DateTime, Utc};

use crate::{
    error::AppResult,
    models::{LoanFilter, LoanRecord, LoanStats, UserRef},
    repository::Repository,
};

#[derive(Clone)]
pub struct OverdueScanner {
    repository: Repository,
}

impl OverdueScanner {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    /// Active loans past their due date at `now`, most overdue first
    pub async fn list_overdue(&self, now: DateTime<Utc>) -> AppResult<Vec<LoanRecord>> {
        let mut overdue: Vec<LoanRecord> = self
            .repository
            .loans
            .find_active()
            .await?
            .into_iter()
            .filter(|l| l.is_overdue_at(now))
            .collect();
        overdue.sort_by(|a, b| a.due_date.cmp(&b.due_date).then_with(|| a.id.cmp(&b.id)));
        Ok(overdue)
    }

    /// Library-wide counters
    pub async fn stats(&self, now: DateTime<Utc>) -> AppResult<LoanStats> {
        let loans = &self.repository.loans;
        let total = loans.count(&LoanFilter::default()).await?;
        let active = loans
            .count(&LoanFilter {
                is_borrowed: Some(true),
                ..Default::default()
            })
            .await?;
        let overdue = self.list_overdue(now).await?.len() as i64;

        Ok(LoanStats {
            total,
            active,
            returned: total - active,
            overdue,
        })
    }

    /// Counters for one borrower
    pub async fn user_stats(&self, user: &UserRef, now: DateTime<Utc>) -> AppResult<LoanStats> {
        let records = self.repository.loans.find_by_user(user).await?;
        Ok(records.iter().fold(LoanStats::default(), |mut stats, loan| {
            stats.total += 1;
            if loan.is_borrowed {
                stats.active += 1;
            } else {
                stats.returned += 1;
            }
            if loan.is_overdue_at(now) {
                stats.overdue += 1;
            }
            stats
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BookRef, NewLoan};
    use crate::repository::memory::MemoryLoanStore;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    fn loan(user: &str, book: &str, due: u32, returned: bool) -> LoanRecord {
        let mut record = LoanRecord::open(
            NewLoan {
                user_id: UserRef::parse(user).unwrap(),
                book_id: BookRef::parse(book).unwrap(),
                borrow_date: at(1),
                due_date: at(due),
                handled_by: "r2".to_string(),
            },
            at(1),
        );
        if returned {
            record.is_borrowed = false;
            record.return_date = Some(at(due));
        }
        record
    }

    const U1: &str = "65a1f0c2e4b0a1b2c3d4e5f6";
    const U2: &str = "000000000000000000000002";

    // three active loans (two past due) and two returned ones
    async fn mixed() -> OverdueScanner {
        let store = MemoryLoanStore::new();
        for record in [
            loan(U1, "bk-1", 10, false),
            loan(U1, "bk-2", 15, false),
            loan(U2, "bk-3", 25, false),
            loan(U2, "bk-4", 5, true),
            loan(U1, "bk-5", 8, true),
        ] {
            store.put_record(record).await;
        }
        OverdueScanner::new(Repository::memory(store))
    }

    #[tokio::test]
    async fn test_list_overdue_mixed_set() {
        let overdue = mixed().await.list_overdue(at(20)).await.unwrap();

        let books: Vec<&str> = overdue.iter().map(|l| l.book_id.as_str()).collect();
        assert_eq!(books, vec!["bk-1", "bk-2"]);
    }

    #[tokio::test]
    async fn test_overdue_is_recomputed_per_call() {
        let scanner = mixed().await;
        assert_eq!(scanner.list_overdue(at(12)).await.unwrap().len(), 1);
        assert_eq!(scanner.list_overdue(at(15)).await.unwrap().len(), 1);
        assert_eq!(scanner.list_overdue(at(26)).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_stats() {
        let stats = mixed().await.stats(at(20)).await.unwrap();
        assert_eq!(
            stats,
            LoanStats {
                total: 5,
                active: 3,
                returned: 2,
                overdue: 2,
            }
        );
    }

    #[tokio::test]
    async fn test_user_stats() {
        let scanner = mixed().await;
        let stats = scanner
            .user_stats(&UserRef::parse(U1).unwrap(), at(12))
            .await
            .unwrap();
        assert_eq!(
            stats,
            LoanStats {
                total: 3,
                active: 2,
                returned: 1,
                overdue: 1,
            }
        );
    }
}
