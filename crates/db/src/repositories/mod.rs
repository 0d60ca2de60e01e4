use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use expenso_core::errors::CollaboratorError;

pub mod company;
pub mod directory;
pub mod ledger;
pub mod report;

pub use company::SqlCompanyConfiguration;
pub use directory::SqlIdentityDirectory;
pub use ledger::SqlLedger;
pub use report::SqlReportRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for CollaboratorError {
    fn from(error: RepositoryError) -> Self {
        CollaboratorError::Persistence(error.to_string())
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(error: serde_json::Error) -> Self {
        RepositoryError::Decode(error.to_string())
    }
}

// Decimals are stored as TEXT so that amounts survive without float rounding.
pub(crate) fn decode_decimal(column: &str, raw: &str) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(raw)
        .map_err(|e| RepositoryError::Decode(format!("{column} `{raw}` is not a decimal: {e}")))
}

pub(crate) fn decode_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{column} `{raw}` is not RFC 3339: {e}")))
}

pub(crate) fn decode_column<T>(
    row: &sqlx::sqlite::SqliteRow,
    column: &str,
) -> Result<T, RepositoryError>
where
    T: for<'r> sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    use sqlx::Row;
    row.try_get(column).map_err(|e| RepositoryError::Decode(e.to_string()))
}
