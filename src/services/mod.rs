//! Business logic services

pub mod availability;
pub mod clock;
pub mod fines;
pub mod loans;
pub mod overdue;
pub mod renewals;
pub mod returns;

use std::sync::Arc;

use crate::{config::LoansConfig, repository::Repository};

use self::clock::Clock;

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub loans: loans::LoansService,
}

impl Services {
    /// Create all services with the given repository
    pub fn new(repository: Repository, loans_config: LoansConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            loans: loans::LoansService::new(repository, loans_config, clock),
        }
    }
}
