//! Error types for HyperIndex Core

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregationError {
    #[error("Cannot aggregate an empty cohort")]
    EmptyCohort,

    #[error("Non-finite {field} for {asset} in wallet {wallet}")]
    NonFinite {
        wallet: String,
        asset: String,
        field: &'static str,
    },
}

pub type AggregationResult<T> = Result<T, AggregationError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CadenceError {
    #[error("Interval cadence must be at least one second")]
    ZeroInterval,

    #[error("Daily cadence needs at least one hour")]
    NoHours,

    #[error("Invalid hour of day: {0}")]
    InvalidHour(u32),

    #[error("Interval of {0}s exceeds the one year maximum")]
    IntervalTooLong(u64),
}
