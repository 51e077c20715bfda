//! Loan desk facade
//!
//! Wires the loan components to one repository, one clock and the loan
//! configuration. HTTP handlers only talk to this type.

use std::sync::Arc;

use crate::{
    config::LoansConfig,
    error::AppResult,
    models::{
        CreateLoanRequest, LoanDetails, LoanFilter, LoanId, LoanQuery, LoanRecord, LoanStats,
        PageRequest, Pagination, UserRef,
    },
    repository::Repository,
};

use super::{
    availability::AvailabilityGate, clock::Clock, fines::FineCalculator, overdue::OverdueScanner,
    renewals::RenewalManager, returns::ReturnProcessor,
};

/// Whether a listing may persist freshly computed fines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FineAssessment {
    /// Recompute and store fines of the listed loans (default for the UI)
    Apply,
    /// Strictly read-only, e.g. for audits
    Skip,
}

#[derive(Clone)]
pub struct LoansService {
    repository: Repository,
    clock: Arc<dyn Clock>,
    config: LoansConfig,
    gate: AvailabilityGate,
    fines: FineCalculator,
    renewals: RenewalManager,
    returns: ReturnProcessor,
    overdue: OverdueScanner,
}

impl LoansService {
    pub fn new(repository: Repository, config: LoansConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            gate: AvailabilityGate::new(repository.clone()),
            fines: FineCalculator::new(repository.clone(), config.daily_fine_rate),
            renewals: RenewalManager::new(repository.clone(), config.max_extend_days),
            returns: ReturnProcessor::new(repository.clone()),
            overdue: OverdueScanner::new(repository.clone()),
            repository,
            clock,
            config,
        }
    }

    fn page(&self, page: Option<i64>, per_page: Option<i64>) -> PageRequest {
        PageRequest::new(
            page,
            per_page,
            self.config.default_page_size,
            self.config.max_page_size,
        )
    }

    pub async fn create_loan(&self, request: CreateLoanRequest) -> AppResult<LoanRecord> {
        self.gate.create_loan(request, self.clock.now()).await
    }

    pub async fn get_loan(&self, id: LoanId) -> AppResult<LoanRecord> {
        self.repository.loans.find_by_id(id).await
    }

    /// Filtered, sorted page of loans
    pub async fn list_loans(&self, query: &LoanQuery) -> AppResult<(Vec<LoanRecord>, Pagination)> {
        let filter = query.filter()?;
        let page = self.page(query.page, query.per_page);
        let (loans, total) = self
            .repository
            .loans
            .find_all(&filter, &page, &query.sort())
            .await?;
        Ok((loans, Pagination::new(&page, total)))
    }

    /// Page of loans with book, borrower and handler summaries
    pub async fn list_loans_with_details(
        &self,
        query: &LoanQuery,
    ) -> AppResult<(Vec<LoanDetails>, Pagination)> {
        let filter = query.filter()?;
        self.details_page(&filter, self.page(query.page, query.per_page))
            .await
    }

    async fn details_page(
        &self,
        filter: &LoanFilter,
        page: PageRequest,
    ) -> AppResult<(Vec<LoanDetails>, Pagination)> {
        let (loans, total) = self
            .repository
            .loans
            .find_with_details(filter, &page, self.clock.now())
            .await?;
        Ok((loans, Pagination::new(&page, total)))
    }

    /// Every loan of a user, most recent first. With [`FineAssessment::Apply`]
    /// the fines are brought up to date as a side effect.
    pub async fn list_by_user(
        &self,
        user: &UserRef,
        assessment: FineAssessment,
    ) -> AppResult<Vec<LoanRecord>> {
        let loans = self.repository.loans.find_by_user(user).await?;
        if assessment == FineAssessment::Skip {
            return Ok(loans);
        }

        let now = self.clock.now();
        let mut assessed = Vec::with_capacity(loans.len());
        for loan in &loans {
            assessed.push(self.fines.assess_and_persist(loan, now).await?);
        }
        Ok(assessed)
    }

    /// The caller's own loans with details, fines assessed first
    pub async fn my_loans(
        &self,
        user: &UserRef,
        page: Option<i64>,
        per_page: Option<i64>,
    ) -> AppResult<(Vec<LoanDetails>, Pagination)> {
        self.list_by_user(user, FineAssessment::Apply).await?;
        let filter = LoanFilter {
            user_id: Some(user.clone()),
            ..Default::default()
        };
        self.details_page(&filter, self.page(page, per_page)).await
    }

    pub async fn return_loan(&self, id: LoanId) -> AppResult<LoanRecord> {
        self.returns.return_loan(id, self.clock.now()).await
    }

    /// Extend by `extend_days`, or the configured default
    pub async fn extend_loan(&self, id: LoanId, extend_days: Option<i64>) -> AppResult<LoanRecord> {
        let days = extend_days.unwrap_or(self.config.default_extend_days);
        self.renewals.extend(id, days, self.clock.now()).await
    }

    /// Assess the fine of a single loan now
    pub async fn assess_fine(&self, id: LoanId) -> AppResult<LoanRecord> {
        let loan = self.get_loan(id).await?;
        self.fines.assess_and_persist(&loan, self.clock.now()).await
    }

    pub async fn pay_fine(&self, id: LoanId) -> AppResult<LoanRecord> {
        self.fines.pay_fine(id, self.clock.now()).await
    }

    pub async fn list_overdue(&self) -> AppResult<Vec<LoanRecord>> {
        self.overdue.list_overdue(self.clock.now()).await
    }

    pub async fn stats(&self) -> AppResult<LoanStats> {
        self.overdue.stats(self.clock.now()).await
    }

    pub async fn user_stats(&self, user: &UserRef) -> AppResult<LoanStats> {
        self.overdue.user_stats(user, self.clock.now()).await
    }

    /// Handler recorded for callers without a role id
    pub fn default_handler(&self) -> &str {
        &self.config.default_handler
    }

    /// Storage readiness
    pub async fn ping(&self) -> AppResult<()> {
        self.repository.loans.ping().await
    }
}
