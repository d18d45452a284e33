//! Per-test statistics history

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::harness::BenchmarkStatistics;

/// Records kept per test; older ones are dropped first
pub const MAX_HISTORY_PER_TEST: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub timestamp: DateTime<Utc>,
    pub statistics: BenchmarkStatistics,
}

/// Bounded, in-process history of benchmark statistics
#[derive(Default)]
pub struct StatisticsHistory {
    records: RwLock<HashMap<String, VecDeque<HistoryRecord>>>,
}

impl StatisticsHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, test: &str, statistics: BenchmarkStatistics) {
        self.record_at(test, statistics, Utc::now());
    }

    pub fn record_at(&self, test: &str, statistics: BenchmarkStatistics, timestamp: DateTime<Utc>) {
        let mut records = self.records.write();
        let series = records.entry(test.to_string()).or_default();
        series.push_back(HistoryRecord {
            timestamp,
            statistics,
        });
        while series.len() > MAX_HISTORY_PER_TEST {
            series.pop_front();
        }
    }

    /// Oldest first
    pub fn history(&self, test: &str) -> Vec<HistoryRecord> {
        self.records
            .read()
            .get(test)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Records at or after `cutoff`, oldest first
    pub fn since(&self, test: &str, cutoff: DateTime<Utc>) -> Vec<HistoryRecord> {
        self.records
            .read()
            .get(test)
            .map(|s| s.iter().filter(|r| r.timestamp >= cutoff).cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, test: &str) -> usize {
        self.records.read().get(test).map_or(0, VecDeque::len)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::stats::Summary;

    fn stats(mean: f64) -> BenchmarkStatistics {
        BenchmarkStatistics {
            duration: Summary::from_values(&[mean]),
            memory: Summary::default(),
            success_rate: 1.0,
            sample_count: 1,
            timestamp: 0,
        }
    }

    #[test]
    fn test_history_is_bounded() {
        let history = StatisticsHistory::new();
        for i in 0..(MAX_HISTORY_PER_TEST + 5) {
            history.record("t", stats(i as f64));
        }
        let records = history.history("t");
        assert_eq!(records.len(), MAX_HISTORY_PER_TEST);
        assert_eq!(records[0].statistics.duration.mean, 5.0);
        assert_eq!(history.len("other"), 0);
    }

    #[test]
    fn test_since_filters_by_time() {
        let history = StatisticsHistory::new();
        let now = Utc::now();
        history.record_at("t", stats(1.0), now - Duration::days(10));
        history.record_at("t", stats(2.0), now - Duration::days(2));
        history.record_at("t", stats(3.0), now);

        let recent = history.since("t", now - Duration::days(7));
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].statistics.duration.mean, 2.0);
    }
}
