//! Weekly velocity and daily completion rate.
//!
//! A task counts as "completed" in a bucket when it has at least one time log
//! inside it. This is a proxy for status transitions, which are not recorded.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Days, Duration, Utc};

use super::types::{DailyCompletion, VelocityReport, VelocityTrend, VelocityWeek};
use super::ProjectData;

pub const DEFAULT_VELOCITY_WEEKS: usize = 8;
pub const DEFAULT_COMPLETION_DAYS: usize = 14;

/// Longest windows computed, about a century.
pub const MAX_VELOCITY_WEEKS: usize = 5_200;
pub const MAX_COMPLETION_DAYS: usize = 36_600;

/// Buckets averaged into each week's rolling average (the week and two prior).
const ROLLING_WINDOW: usize = 3;

/// Velocity over the trailing `weeks` seven-day buckets ending at `now`, oldest first.
pub fn calculate_velocity(data: &ProjectData, weeks: usize, now: DateTime<Utc>) -> VelocityReport {
    let estimates: HashMap<&str, Option<f64>> = data
        .tasks
        .iter()
        .map(|t| (t.id.as_str(), t.estimate_hours))
        .collect();

    if weeks > MAX_VELOCITY_WEEKS {
        log::warn!("Velocity over {weeks} weeks truncated to {MAX_VELOCITY_WEEKS}");
    }
    let weeks = weeks.min(MAX_VELOCITY_WEEKS);

    let mut buckets: Vec<VelocityWeek> = Vec::with_capacity(weeks);
    for i in (0..weeks).rev() {
        let bounds = now
            .checked_sub_signed(Duration::weeks(i as i64))
            .and_then(|end| Some((end.checked_sub_signed(Duration::weeks(1))?, end)));
        let Some((start, end)) = bounds else {
            continue;
        };

        let task_ids: BTreeSet<&str> = data
            .time_logs
            .iter()
            .filter(|l| l.logged_at > start && l.logged_at <= end)
            .map(|l| l.task_id.as_str())
            .collect();
        let points = task_ids
            .iter()
            .map(|id| estimates.get(id).copied().flatten().unwrap_or(1.0))
            .sum();

        buckets.push(VelocityWeek {
            start,
            end,
            completed: task_ids.len(),
            points,
            rolling_average: 0.0,
        });
    }

    for j in 0..buckets.len() {
        let from = (j + 1).saturating_sub(ROLLING_WINDOW);
        let window = &buckets[from..=j];
        let sum: usize = window.iter().map(|w| w.completed).sum();
        let average = sum as f64 / window.len() as f64;
        buckets[j].rolling_average = average;
    }

    let average_completed = if buckets.is_empty() {
        0.0
    } else {
        buckets.iter().map(|w| w.completed).sum::<usize>() as f64 / buckets.len() as f64
    };

    let mut report = VelocityReport {
        weeks: buckets,
        average_completed,
        trend: VelocityTrend::Stable,
    };
    report.trend = match (report.current(), report.previous()) {
        (Some(current), Some(previous)) => trend(current.completed, previous.completed),
        _ => VelocityTrend::Stable,
    };
    report
}

fn trend(current: usize, previous: usize) -> VelocityTrend {
    let (current, previous) = (current as f64, previous as f64);
    if current > previous * 1.1 {
        VelocityTrend::Up
    } else if current < previous * 0.9 {
        VelocityTrend::Down
    } else {
        VelocityTrend::Stable
    }
}

/// Per-day share of tasks with logged activity over the trailing `days` days
/// ending today, oldest first.
pub fn completion_rate(data: &ProjectData, days: usize, now: DateTime<Utc>) -> Vec<DailyCompletion> {
    let today = now.date_naive();
    let total = data.total_tasks();
    if days > MAX_COMPLETION_DAYS {
        log::warn!("Completion rate over {days} days truncated to {MAX_COMPLETION_DAYS}");
    }

    (0..days.min(MAX_COMPLETION_DAYS))
        .rev()
        .filter_map(|i| today.checked_sub_days(Days::new(i as u64)))
        .map(|date| {
            let completed = data
                .time_logs
                .iter()
                .filter(|l| l.logged_at.date_naive() == date)
                .map(|l| l.task_id.as_str())
                .collect::<BTreeSet<_>>()
                .len();
            let rate = if total == 0 {
                0.0
            } else {
                completed as f64 / total as f64
            };
            DailyCompletion {
                date,
                completed,
                rate,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::test_support::*;
    use crate::model::TaskStatus;

    fn weeks_ago(weeks: i64, extra_hours: i64) -> DateTime<Utc> {
        now() - Duration::weeks(weeks) - Duration::hours(extra_hours)
    }

    #[test]
    fn test_empty_data_is_flat() {
        let report = calculate_velocity(&ProjectData::empty("p1"), DEFAULT_VELOCITY_WEEKS, now());
        assert_eq!(report.weeks.len(), 8);
        assert!(report.weeks.iter().all(|w| w.completed == 0 && w.points == 0.0));
        assert_eq!(report.average_completed, 0.0);
        assert_eq!(report.trend, VelocityTrend::Stable);
    }

    #[test]
    fn test_zero_weeks() {
        let report = calculate_velocity(&ProjectData::empty("p1"), 0, now());
        assert!(report.weeks.is_empty());
        assert_eq!(report.trend, VelocityTrend::Stable);
    }

    #[test]
    fn test_buckets_count_distinct_tasks_and_points() {
        let mut tasks = tasks(3, 0);
        tasks[0].estimate_hours = Some(5.0);
        tasks[1].estimate_hours = Some(2.5);
        let data = data_with(
            tasks,
            vec![
                // Current week: t0 twice, t2 once.
                log_at("t0", 1.0, weeks_ago(0, 1)),
                log_at("t0", 1.0, weeks_ago(0, 30)),
                log_at("t2", 1.0, weeks_ago(0, 2)),
                // Previous week: t1.
                log_at("t1", 1.0, weeks_ago(1, 5)),
            ],
        );

        let report = calculate_velocity(&data, 2, now());
        assert_eq!(report.weeks.len(), 2);
        let previous = report.previous().unwrap();
        let current = report.current().unwrap();
        assert_eq!(previous.completed, 1);
        assert_eq!(previous.points, 2.5);
        assert_eq!(current.completed, 2);
        assert_eq!(current.points, 6.0); // 5.0 + 1 for unestimated t2
        assert_eq!(current.end, now());
        assert_eq!(report.trend, VelocityTrend::Up);
    }

    #[test]
    fn test_rolling_average_uses_three_buckets() {
        let tasks: Vec<_> = (0..6).map(|i| task(&format!("t{i}"), TaskStatus::Todo)).collect();
        let mut logs = Vec::new();
        // Oldest to newest bucket: 1, 2, 3, 0 completed tasks.
        for (weeks_back, ids) in [(3, vec!["t0"]), (2, vec!["t1", "t2"]), (1, vec!["t3", "t4", "t5"])] {
            for id in ids {
                logs.push(log_at(id, 1.0, weeks_ago(weeks_back, 1)));
            }
        }
        let report = calculate_velocity(&data_with(tasks, logs), 4, now());
        let averages: Vec<f64> = report.weeks.iter().map(|w| w.rolling_average).collect();
        assert_eq!(averages, vec![1.0, 1.5, 2.0, 5.0 / 3.0]);
        assert_eq!(report.average_completed, 1.5);
        assert_eq!(report.trend, VelocityTrend::Down);
    }

    #[test]
    fn test_trend_thresholds() {
        assert_eq!(trend(11, 10), VelocityTrend::Stable);
        assert_eq!(trend(12, 10), VelocityTrend::Up);
        assert_eq!(trend(9, 10), VelocityTrend::Stable);
        assert_eq!(trend(8, 10), VelocityTrend::Down);
        assert_eq!(trend(1, 0), VelocityTrend::Up);
        assert_eq!(trend(0, 0), VelocityTrend::Stable);
    }

    #[test]
    fn test_velocity_is_deterministic() {
        let data = data_with(tasks(2, 0), vec![log_at("t0", 1.0, weeks_ago(0, 3))]);
        assert_eq!(calculate_velocity(&data, 4, now()), calculate_velocity(&data, 4, now()));
    }

    #[test]
    fn test_oversized_windows_are_truncated() {
        let data = data_with(tasks(1, 0), vec![log_at("t0", 1.0, now())]);

        let report = calculate_velocity(&data, 20_000_000, now());
        assert_eq!(report.weeks.len(), MAX_VELOCITY_WEEKS);
        assert_eq!(report.current().unwrap().completed, 1);
        assert_eq!(report.current().unwrap().end, now());

        let rates = completion_rate(&data, 200_000_000, now());
        assert_eq!(rates.len(), MAX_COMPLETION_DAYS);
        assert_eq!(rates[rates.len() - 1].date, today());
        assert_eq!(rates[rates.len() - 1].completed, 1);
    }

    #[test]
    fn test_completion_rate_per_day() {
        let data = data_with(
            tasks(4, 0),
            vec![
                log_at("t0", 1.0, now()),
                log_at("t0", 2.0, now() - Duration::hours(1)),
                log_at("t1", 1.0, now() - Duration::hours(2)),
                log_at("t2", 1.0, now() - Duration::days(2)),
            ],
        );
        let rates = completion_rate(&data, 3, now());
        assert_eq!(rates.len(), 3);
        assert_eq!(rates[0].date, day(-2));
        assert_eq!(rates[0].completed, 1);
        assert_eq!(rates[0].rate, 0.25);
        assert_eq!(rates[1].completed, 0);
        assert_eq!(rates[2].date, today());
        assert_eq!(rates[2].completed, 2);
        assert_eq!(rates[2].rate, 0.5);
    }

    #[test]
    fn test_completion_rate_without_tasks_is_zero() {
        let rates = completion_rate(&ProjectData::empty("p1"), 5, now());
        assert_eq!(rates.len(), 5);
        assert!(rates.iter().all(|r| r.rate == 0.0 && r.completed == 0));
    }
}
