//! Fine calculation, lazy assessment and payment

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use crate::{
    error::{AppError, AppResult},
    models::{LoanId, LoanPatch, LoanRecord},
    repository::Repository,
};

/// Whole days overdue at `now`, any started day counted as a full one
pub fn overdue_days(record: &LoanRecord, now: DateTime<Utc>) -> i64 {
    if !record.is_overdue_at(now) {
        return 0;
    }
    let overdue = now - record.due_date;
    let days = overdue.num_days();
    if overdue > Duration::days(days) {
        days + 1
    } else {
        days
    }
}

#[derive(Clone)]
pub struct FineCalculator {
    repository: Repository,
    daily_rate: Decimal,
}

impl FineCalculator {
    pub fn new(repository: Repository, daily_rate: Decimal) -> Self {
        Self {
            repository,
            daily_rate,
        }
    }

    /// Fine owed at `now`: zero unless the loan is active and past due
    pub fn compute_fine(&self, record: &LoanRecord, now: DateTime<Utc>) -> Decimal {
        Decimal::from(overdue_days(record, now)) * self.daily_rate
    }

    /// Changes an assessment at `now` would persist, if any.
    ///
    /// Closed loans keep the fine recorded while they were active. A paid
    /// fine is only reopened when the amount owed has grown since payment.
    pub fn assessment(&self, record: &LoanRecord, now: DateTime<Utc>) -> Option<LoanPatch> {
        if !record.is_borrowed {
            return None;
        }
        let amount = self.compute_fine(record, now);
        let stored = record.fine_or_zero();
        let paid = record.fine_paid == Some(true);
        if amount == stored || (paid && amount < stored) {
            return None;
        }
        Some(LoanPatch {
            fine_amount: Some(amount),
            fine_due_date: Some(now),
            fine_paid: paid.then_some(false),
            ..Default::default()
        })
    }

    /// Recompute the fine of a loan and store it when it changed
    pub async fn assess_and_persist(
        &self,
        record: &LoanRecord,
        now: DateTime<Utc>,
    ) -> AppResult<LoanRecord> {
        // cheap pre-check on the caller's copy, most reads change nothing
        if self.assessment(record, now).is_none() {
            return Ok(record.clone());
        }

        let mut tx = self.repository.loans.begin().await?;
        let current = tx
            .lock_loan(record.id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Loan {} not found", record.id)))?;

        let Some(patch) = self.assessment(&current, now) else {
            return Ok(current);
        };

        let updated = tx.update(current.id, &patch, now).await?;
        tx.commit().await?;

        tracing::info!(
            loan_id = %updated.id,
            user_id = %updated.user_id,
            fine_amount = %updated.fine_or_zero(),
            "Fine assessed"
        );
        Ok(updated)
    }

    /// Mark an outstanding fine as paid. The amount is kept for history.
    pub async fn pay_fine(&self, id: LoanId, now: DateTime<Utc>) -> AppResult<LoanRecord> {
        let mut tx = self.repository.loans.begin().await?;
        let current = tx
            .lock_loan(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Loan {} not found", id)))?;

        if current.fine_or_zero() <= Decimal::ZERO || current.fine_paid == Some(true) {
            tracing::debug!(loan_id = %id, "Fine payment rejected");
            return Err(AppError::Conflict("nothing to pay".to_string()));
        }

        let patch = LoanPatch {
            fine_paid: Some(true),
            ..Default::default()
        };
        let updated = tx.update(id, &patch, now).await?;
        tx.commit().await?;

        tracing::info!(
            loan_id = %id,
            user_id = %updated.user_id,
            fine_amount = %updated.fine_or_zero(),
            "Fine paid"
        );
        Ok(updated)
    }
}
