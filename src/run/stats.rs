//! Run statistics
//!
//! Counters accumulated over one crawl run. They serialize to and from the
//! flat, slash-separated key layout crawl engines dump at the end of a run:
//!
//! ```json
//! {
//!   "item_scraped_count": 12,
//!   "log_count/ERROR": 0,
//!   "item_dropped_reasons_count/MissingRequiredFields": 1,
//!   "finish_reason": "finished"
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

const ITEM_SCRAPED_COUNT: &str = "item_scraped_count";
const SPIDER_EXCEPTIONS: &str = "spider_exceptions";
const LOG_COUNT_CRITICAL: &str = "log_count/CRITICAL";
const LOG_COUNT_ERROR: &str = "log_count/ERROR";
const FINISH_REASON: &str = "finish_reason";
const DROPPED_REASON_PREFIX: &str = "item_dropped_reasons_count/";

/// Terminal reason of a run that ended normally
pub const FINISHED: &str = "finished";

/// Drop reason counted against required item fields
pub const MISSING_REQUIRED_FIELDS: &str = "MissingRequiredFields";

/// Counters for one crawl run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<String, Value>",
    into = "BTreeMap<String, Value>"
)]
pub struct RunStats {
    pub item_scraped_count: u64,
    pub spider_exceptions: u64,
    pub log_count_critical: u64,
    pub log_count_error: u64,
    pub finish_reason: Option<String>,
    pub item_dropped_reasons_count: BTreeMap<String, u64>,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_item(&mut self) {
        self.item_scraped_count += 1;
    }

    pub fn record_exception(&mut self) {
        self.spider_exceptions += 1;
    }

    pub fn record_critical(&mut self) {
        self.log_count_critical += 1;
    }

    pub fn record_error(&mut self) {
        self.log_count_error += 1;
    }

    /// Counts one item dropped for `reason`
    pub fn record_drop(&mut self, reason: &str) {
        *self
            .item_dropped_reasons_count
            .entry(reason.to_string())
            .or_insert(0) += 1;
    }

    pub fn finish(&mut self, reason: impl Into<String>) {
        self.finish_reason = Some(reason.into());
    }

    /// Items dropped because required fields were missing
    pub fn missing_required_fields(&self) -> u64 {
        self.dropped_for(MISSING_REQUIRED_FIELDS)
    }

    pub fn dropped_for(&self, reason: &str) -> u64 {
        self.item_dropped_reasons_count
            .get(reason)
            .copied()
            .unwrap_or(0)
    }
}

fn as_count(value: &Value) -> u64 {
    value.as_u64().unwrap_or(0)
}

impl From<BTreeMap<String, Value>> for RunStats {
    /// Reads known keys and ignores everything else
    ///
    /// Exception counts may be either a single `spider_exceptions` counter or
    /// one `spider_exceptions/<Type>` counter per exception type; both are summed.
    fn from(map: BTreeMap<String, Value>) -> Self {
        let mut stats = RunStats::default();

        for (key, value) in &map {
            match key.as_str() {
                ITEM_SCRAPED_COUNT => stats.item_scraped_count = as_count(value),
                SPIDER_EXCEPTIONS => stats.spider_exceptions += as_count(value),
                LOG_COUNT_CRITICAL => stats.log_count_critical = as_count(value),
                LOG_COUNT_ERROR => stats.log_count_error = as_count(value),
                FINISH_REASON => stats.finish_reason = value.as_str().map(str::to_string),
                other => {
                    if let Some(reason) = other.strip_prefix(DROPPED_REASON_PREFIX) {
                        stats
                            .item_dropped_reasons_count
                            .insert(reason.to_string(), as_count(value));
                    } else if other.starts_with("spider_exceptions/") {
                        stats.spider_exceptions += as_count(value);
                    }
                }
            }
        }

        stats
    }
}

impl From<RunStats> for BTreeMap<String, Value> {
    fn from(stats: RunStats) -> Self {
        let mut map = BTreeMap::new();
        map.insert(ITEM_SCRAPED_COUNT.to_string(), Value::from(stats.item_scraped_count));
        map.insert(SPIDER_EXCEPTIONS.to_string(), Value::from(stats.spider_exceptions));
        map.insert(LOG_COUNT_CRITICAL.to_string(), Value::from(stats.log_count_critical));
        map.insert(LOG_COUNT_ERROR.to_string(), Value::from(stats.log_count_error));
        if let Some(reason) = stats.finish_reason {
            map.insert(FINISH_REASON.to_string(), Value::from(reason));
        }
        for (reason, count) in stats.item_dropped_reasons_count {
            map.insert(format!("{}{}", DROPPED_REASON_PREFIX, reason), Value::from(count));
        }
        map
    }
}
