//! Data models for SmartLibrary loans

pub mod book;
pub mod ids;
pub mod loan;
pub mod user;

// Re-export commonly used types
pub use book::BookSummary;
pub use ids::{BookRef, LoanId, UserRef};
pub use loan::{
    CreateLoanRequest, LoanDetails, LoanFilter, LoanPatch, LoanQuery, LoanRecord, LoanSort,
    LoanStats, NewLoan, PageRequest, Pagination,
};
pub use user::{HandlerSummary, Role, UserClaims, UserSummary};
