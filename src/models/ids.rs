//! Typed identifiers for loans, users and books

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};
use snowflaked::sync::Generator;
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

static LOAN_IDS: Generator = Generator::new(0);

static OBJECT_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-fA-F0-9]{24}$").unwrap());

/// Loan identifier (snowflake). Serialized as a string so that browsers keep
/// every digit.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(transparent)]
#[schema(value_type = String, example = "7220938472931475456")]
pub struct LoanId(#[serde_as(as = "DisplayFromStr")] pub i64);

impl LoanId {
    /// Allocate a fresh, time-ordered identifier
    pub fn generate() -> Self {
        LoanId(LOAN_IDS.generate())
    }
}

impl fmt::Display for LoanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LoanId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(LoanId)
    }
}

/// Reference to a user of the identity service (24 hexadecimal characters)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(transparent)]
#[serde(transparent)]
#[schema(value_type = String, example = "65a1f0c2e4b0a1b2c3d4e5f6")]
pub struct UserRef(String);

impl UserRef {
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        OBJECT_ID
            .is_match(trimmed)
            .then(|| UserRef(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to a catalog book
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(transparent)]
#[serde(transparent)]
#[schema(value_type = String, example = "bk-0042")]
pub struct BookRef(String);

impl BookRef {
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then(|| BookRef(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BookRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
