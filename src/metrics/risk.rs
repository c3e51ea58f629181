//! Project risk: a weighted sum of five 0-100 contributions.

use chrono::{DateTime, Duration, NaiveDate, Utc};

use super::types::{RiskFactors, RiskLevel, RiskReport, VelocityTrend};
use super::{accuracy, velocity, ProjectData};
use crate::date_util::days_until;
use crate::model::TaskStatus;

const OVERDUE_WEIGHT: f64 = 0.25;
const VELOCITY_WEIGHT: f64 = 0.20;
const BLOCKER_WEIGHT: f64 = 0.15;
const DEADLINE_WEIGHT: f64 = 0.25;
const ACCURACY_WEIGHT: f64 = 0.15;

/// Weekly buckets inspected for a velocity drop.
const VELOCITY_WEEKS: usize = 4;
/// An in-progress task with no time logged for this long is stuck.
const STUCK_AFTER_DAYS: i64 = 7;
/// Estimate accuracy is only judged with at least this many measured tasks.
const MIN_ACCURACY_SAMPLE: usize = 3;

/// Score a project's delivery risk at `now`.
pub fn calculate_risk(
    data: &ProjectData,
    deadline: Option<NaiveDate>,
    now: DateTime<Utc>,
) -> RiskReport {
    let velocity_report = velocity::calculate_velocity(data, VELOCITY_WEEKS, now);
    let daily_velocity = velocity_report
        .current()
        .map(|w| w.rolling_average / 7.0)
        .unwrap_or(0.0);

    let factors = RiskFactors {
        overdue: overdue_risk(data, now.date_naive()),
        velocity: velocity_risk(
            velocity_report.current().map(|w| w.completed),
            velocity_report.previous().map(|w| w.completed),
            velocity_report.trend,
        ),
        blockers: blocker_risk(data, now),
        deadline: deadline_risk(data, deadline, now.date_naive(), daily_velocity),
        estimate_accuracy: accuracy_risk(data),
    };

    let score = factors.overdue * OVERDUE_WEIGHT
        + factors.velocity * VELOCITY_WEIGHT
        + factors.blockers * BLOCKER_WEIGHT
        + factors.deadline * DEADLINE_WEIGHT
        + factors.estimate_accuracy * ACCURACY_WEIGHT;
    let level = RiskLevel::from_score(score);

    log::debug!(
        "Risk for {}: score={score:.1} level={} factors={factors:?}",
        data.project_id,
        level.as_str()
    );

    RiskReport {
        project_id: data.project_id.clone(),
        score,
        level,
        recommendations: recommendations(&factors),
        factors,
    }
}

fn share_of_tasks(count: usize, data: &ProjectData) -> f64 {
    let total = data.total_tasks();
    if total == 0 {
        return 0.0;
    }
    (count as f64 / total as f64 * 100.0).min(100.0)
}

fn overdue_risk(data: &ProjectData, today: NaiveDate) -> f64 {
    share_of_tasks(data.overdue_tasks(today), data)
}

fn velocity_risk(current: Option<usize>, previous: Option<usize>, trend: VelocityTrend) -> f64 {
    if let (Some(current), Some(previous)) = (current, previous) {
        if previous > 0 && (current as f64) < previous as f64 * 0.7 {
            return 60.0;
        }
    }
    if trend == VelocityTrend::Down {
        30.0
    } else {
        0.0
    }
}

fn blocker_risk(data: &ProjectData, now: DateTime<Utc>) -> f64 {
    let cutoff = now - Duration::days(STUCK_AFTER_DAYS);
    let last_logs = data.last_log_by_task();
    let stuck = data
        .tasks
        .iter()
        .filter(|t| t.status == TaskStatus::InProgress)
        .filter(|t| {
            last_logs
                .get(t.id.as_str())
                .map_or(true, |last| *last < cutoff)
        })
        .count();
    share_of_tasks(stuck, data)
}

fn deadline_risk(
    data: &ProjectData,
    deadline: Option<NaiveDate>,
    today: NaiveDate,
    daily_velocity: f64,
) -> f64 {
    let Some(deadline) = deadline else {
        return 0.0;
    };
    let days_left = days_until(today, deadline);
    let completion = data.completion_percent();
    if days_left < 0 {
        return 100.0;
    }
    if days_left <= 3 && completion < 80.0 {
        return 80.0;
    }
    if days_left <= 7 && completion < 70.0 {
        return 60.0;
    }
    if days_left > 0 && daily_velocity > 0.0 {
        let remaining = (data.total_tasks() - data.done_tasks()) as f64;
        let required = remaining / days_left as f64;
        if required > daily_velocity * 1.5 {
            return 50.0;
        }
    }
    0.0
}

fn accuracy_risk(data: &ProjectData) -> f64 {
    let measured = accuracy::estimate_accuracy(&data.tasks);
    if measured.tasks.len() < MIN_ACCURACY_SAMPLE {
        return 0.0;
    }
    if measured.average_variance > 40.0 {
        70.0
    } else if measured.average_variance > 25.0 {
        40.0
    } else {
        0.0
    }
}

fn recommendations(factors: &RiskFactors) -> Vec<String> {
    let mut out = Vec::new();
    if factors.overdue > 20.0 {
        out.push("Re-plan or reassign overdue tasks; more than a fifth of the work is late.".to_string());
    }
    if factors.velocity > 0.0 {
        out.push("Velocity is dropping. Check for blockers or scope creep.".to_string());
    }
    if factors.blockers > 10.0 {
        out.push("Several in-progress tasks have had no logged time for a week. Follow up with their owners.".to_string());
    }
    if factors.deadline >= 50.0 {
        out.push("The deadline is at risk. Cut scope or move the date.".to_string());
    }
    if factors.estimate_accuracy >= 40.0 {
        out.push("Estimates are far from actual effort. Revisit how tasks are sized.".to_string());
    }
    if out.is_empty() {
        out.push("Project is tracking well. Keep the current pace.".to_string());
    }
    out
}
