//! Post-run acceptance check

use crate::run::stats::{RunStats, FINISHED};
use thiserror::Error;

/// Reason a finished run is not acceptable
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("Exceptions raised: {0}")]
    Exceptions(u64),

    #[error("Critical errors logged: {0}")]
    CriticalLogs(u64),

    #[error("Errors logged: {0}")]
    ErrorLogs(u64),

    #[error("Few items scraped: {count} (minimum {min_items})")]
    TooFewItems { count: u64, min_items: u64 },

    #[error("Scraping finished with reason '{0}'")]
    FinishReason(String),

    #[error("Items missing required fields: {0}")]
    MissingRequiredFields(u64),
}

/// Decides from final counters alone whether a run is acceptable
///
/// Conditions are checked in a fixed order and the first violation is
/// reported. A run without a recorded finish reason is not rejected for it.
///
/// # Arguments
///
/// * `stats` - Counters of the finished run
/// * `min_items` - Minimum number of scraped items; `0` accepts an empty run
///
/// # Example
///
/// ```
/// use plucker::run::{evaluate, PolicyError, RunStats};
///
/// let mut stats = RunStats::new();
/// stats.item_scraped_count = 10;
/// stats.finish("finished");
/// assert_eq!(evaluate(&stats, 10), Ok(()));
///
/// stats.log_count_error = 1;
/// assert_eq!(evaluate(&stats, 10), Err(PolicyError::ErrorLogs(1)));
/// ```
pub fn evaluate(stats: &RunStats, min_items: u64) -> Result<(), PolicyError> {
    if stats.spider_exceptions > 0 {
        return Err(PolicyError::Exceptions(stats.spider_exceptions));
    }
    if stats.log_count_critical > 0 {
        return Err(PolicyError::CriticalLogs(stats.log_count_critical));
    }
    if stats.log_count_error > 0 {
        return Err(PolicyError::ErrorLogs(stats.log_count_error));
    }
    if stats.item_scraped_count < min_items {
        return Err(PolicyError::TooFewItems {
            count: stats.item_scraped_count,
            min_items,
        });
    }
    if let Some(reason) = &stats.finish_reason {
        if reason != FINISHED {
            return Err(PolicyError::FinishReason(reason.clone()));
        }
    }
    let missing = stats.missing_required_fields();
    if missing > 0 {
        return Err(PolicyError::MissingRequiredFields(missing));
    }
    Ok(())
}
