use chrono::{DateTime, Duration, NaiveDate, Utc};

use super::types::BurndownPoint;
use super::ProjectData;

/// Ideal vs actual remaining tasks for each day in `start..=end`.
///
/// A done task counts as burned down from the day of its last time log, or
/// from today if it was never logged against. Returns an empty series when
/// `start` is after `end`.
pub fn calculate_burndown(
    data: &ProjectData,
    start: NaiveDate,
    end: NaiveDate,
    now: DateTime<Utc>,
) -> Vec<BurndownPoint> {
    if start > end {
        return Vec::new();
    }
    let today = now.date_naive();
    let total = data.total_tasks();
    let last_logs = data.last_log_by_task();

    let completed_on: Vec<NaiveDate> = data
        .tasks
        .iter()
        .filter(|t| t.is_done())
        .map(|t| {
            last_logs
                .get(t.id.as_str())
                .map(|at| at.date_naive())
                .unwrap_or(today)
        })
        .collect();

    let days = (end - start).num_days() + 1;
    (0..days)
        .map(|i| {
            let date = start + Duration::days(i);
            let ideal = if days == 1 {
                0.0
            } else {
                total as f64 * (1.0 - i as f64 / (days - 1) as f64)
            };
            let burned = completed_on.iter().filter(|d| **d <= date).count();
            BurndownPoint {
                date,
                ideal,
                actual: total - burned,
            }
        })
        .collect()
}
