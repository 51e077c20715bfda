//! Loan extension

use chrono::{DateTime, Duration, Utc};

use crate::{
    error::{AppError, AppResult},
    models::{LoanId, LoanPatch, LoanRecord},
    repository::Repository,
};

#[derive(Clone)]
pub struct RenewalManager {
    repository: Repository,
    max_extend_days: i64,
}

impl RenewalManager {
    pub fn new(repository: Repository, max_extend_days: i64) -> Self {
        Self {
            repository,
            max_extend_days,
        }
    }

    /// Push the due date of an active loan back by `extend_days` calendar
    /// days. The returned record carries the new due date.
    pub async fn extend(
        &self,
        id: LoanId,
        extend_days: i64,
        now: DateTime<Utc>,
    ) -> AppResult<LoanRecord> {
        if !(1..=self.max_extend_days).contains(&extend_days) {
            return Err(AppError::Validation(vec![format!(
                "extend_days must be between 1 and {}",
                self.max_extend_days
            )]));
        }

        let mut tx = self.repository.loans.begin().await?;
        let current = tx
            .lock_loan(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Loan {} not found", id)))?;

        if !current.is_borrowed {
            tracing::debug!(loan_id = %id, "Extension of closed loan rejected");
            return Err(AppError::Conflict("cannot extend".to_string()));
        }

        let patch = LoanPatch {
            due_date: Some(current.due_date + Duration::days(extend_days)),
            renewal_count: Some(current.renewal_count.unwrap_or(0) + 1),
            ..Default::default()
        };
        let updated = tx.update(id, &patch, now).await?;
        tx.commit().await?;

        tracing::info!(
            loan_id = %id,
            due_date = %updated.due_date,
            renewal_count = updated.renewal_count.unwrap_or(0),
            "Loan extended"
        );
        Ok(updated)
    }
}
