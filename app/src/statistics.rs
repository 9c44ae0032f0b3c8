//! Per-day, per-provider accuracy statistics (mirrors the original
//! statistics manager). Every public method swallows its own errors and
//! logs them — statistics are an observability side-channel, and a bug
//! here must never abort a receipt the workflow is otherwise able to
//! finish.

use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct DailyStats {
    pub date: String,
    pub gemini_total_calls: u64,
    pub gemini_sum_check_passed: u64,
    pub gemini_accuracy: f64,
    pub other_total_calls: u64,
    pub other_sum_check_passed: u64,
    pub other_accuracy: f64,
    pub error_count: u64,
    pub manual_review_count: u64,
}

impl DailyStats {
    fn new(date: impl Into<String>) -> Self {
        Self { date: date.into(), ..Default::default() }
    }

    fn recompute_accuracy(&mut self) {
        self.gemini_accuracy = ratio(self.gemini_sum_check_passed, self.gemini_total_calls);
        self.other_accuracy = ratio(self.other_sum_check_passed, self.other_total_calls);
    }
}

fn ratio(passed: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (passed as f64 / total as f64 * 10_000.0).round() / 10_000.0
}

/// Keyed by UTC calendar day (`YYYY-MM-DD`).
#[derive(Default)]
pub struct StatisticsManager {
    days: RwLock<HashMap<String, DailyStats>>,
}

impl StatisticsManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one LLM call's outcome for `date` (UTC day string). Never
    /// panics or returns an error to the caller; a lock failure is logged
    /// and silently skipped.
    pub fn update_statistics(&self, date: &str, llm_provider: &str, sum_check_passed: bool, is_error: bool, is_manual_review: bool) {
        let Ok(mut days) = self.days.write() else {
            tracing::error!("statistics lock poisoned, dropping update for {date}");
            return;
        };
        let stats = days.entry(date.to_string()).or_insert_with(|| DailyStats::new(date));

        if llm_provider == "gemini" {
            stats.gemini_total_calls += 1;
            if sum_check_passed {
                stats.gemini_sum_check_passed += 1;
            }
        } else {
            stats.other_total_calls += 1;
            if sum_check_passed {
                stats.other_sum_check_passed += 1;
            }
        }
        if is_error {
            stats.error_count += 1;
        }
        if is_manual_review {
            stats.manual_review_count += 1;
        }
        stats.recompute_accuracy();
    }

    pub fn get_statistics(&self, date: &str) -> Option<DailyStats> {
        self.days.read().ok()?.get(date).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_statistics_tracks_gemini_and_other_separately() {
        let stats = StatisticsManager::new();
        stats.update_statistics("2026-01-01", "gemini", true, false, false);
        stats.update_statistics("2026-01-01", "gemini", false, false, false);
        stats.update_statistics("2026-01-01", "gpt-4o-mini", true, false, false);

        let day = stats.get_statistics("2026-01-01").unwrap();
        assert_eq!(day.gemini_total_calls, 2);
        assert_eq!(day.gemini_sum_check_passed, 1);
        assert_eq!(day.gemini_accuracy, 0.5);
        assert_eq!(day.other_total_calls, 1);
        assert_eq!(day.other_accuracy, 1.0);
    }

    #[test]
    fn test_error_and_manual_review_counts_are_provider_agnostic() {
        let stats = StatisticsManager::new();
        stats.update_statistics("2026-01-01", "gemini", false, true, false);
        stats.update_statistics("2026-01-01", "gpt-4o-mini", false, false, true);

        let day = stats.get_statistics("2026-01-01").unwrap();
        assert_eq!(day.error_count, 1);
        assert_eq!(day.manual_review_count, 1);
    }

    #[test]
    fn test_unknown_date_returns_none() {
        let stats = StatisticsManager::new();
        assert!(stats.get_statistics("2026-01-01").is_none());
    }
}
