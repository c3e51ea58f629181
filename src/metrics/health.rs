//! Project health: an additive penalty model starting from 100.
//!
//! Four factors (deadline, activity, completion, dependencies) each carry a
//! fixed penalty table; overdue tasks and milestones add capped penalties from
//! [`HealthWeights`]. The result is clamped to `0..=100`.

use chrono::{DateTime, Duration, NaiveDate, Utc};

use super::types::{HealthFactors, HealthReport, HealthStatus};
use super::ProjectData;
use crate::config::HealthWeights;
use crate::date_util::days_until;
use crate::model::{Project, ProjectEvent, ProjectStatus};

/// Window for the activity factor.
const ACTIVITY_WINDOW_DAYS: i64 = 7;

/// Score a project's health at `now`.
pub fn calculate_health(
    project: &Project,
    data: &ProjectData,
    weights: &HealthWeights,
    now: DateTime<Utc>,
) -> HealthReport {
    let today = now.date_naive();

    let (deadline, deadline_penalty) = deadline_factor(project.deadline, today);
    let (activity, activity_penalty) = activity_factor(&data.events, now);
    let (completion, completion_penalty) = completion_factor(data, project.status);
    let incomplete_dependencies = data.incomplete_dependencies();
    let (dependencies, dependency_penalty) = dependency_factor(incomplete_dependencies);

    let overdue_tasks = data.overdue_tasks(today);
    let overdue_milestones = data.overdue_milestones(today);

    let penalty = i64::from(deadline_penalty)
        + i64::from(activity_penalty)
        + i64::from(completion_penalty)
        + dependency_penalty
        + i64::from(weights.overdue_task_penalty(overdue_tasks))
        + i64::from(weights.overdue_milestone_penalty(overdue_milestones));
    let score = (100 - penalty).clamp(0, 100) as u8;

    log::debug!(
        "Health for {}: score={score} (deadline -{deadline_penalty}, activity -{activity_penalty}, \
         completion -{completion_penalty}, dependencies -{dependency_penalty}, \
         overdue tasks={overdue_tasks}, overdue milestones={overdue_milestones})",
        project.id
    );

    HealthReport {
        project_id: project.id.clone(),
        score,
        status: HealthStatus::from_score(score),
        factors: HealthFactors {
            deadline,
            activity,
            dependencies,
            completion,
        },
        overdue_tasks,
        overdue_milestones,
        incomplete_dependencies,
    }
}

/// `(factor, penalty)` for the project deadline.
fn deadline_factor(deadline: Option<NaiveDate>, today: NaiveDate) -> (u8, u8) {
    let Some(deadline) = deadline else {
        return (100, 0);
    };
    match days_until(today, deadline) {
        d if d < 0 => (0, 30),
        d if d < 3 => (40, 18),
        d if d < 7 => (70, 9),
        _ => (100, 0),
    }
}

/// `(factor, penalty)` from the number of events in the last week. A project
/// with no history at all is not penalised.
fn activity_factor(events: &[ProjectEvent], now: DateTime<Utc>) -> (u8, u8) {
    if events.is_empty() {
        return (100, 0);
    }
    let cutoff = now - Duration::days(ACTIVITY_WINDOW_DAYS);
    match events.iter().filter(|e| e.timestamp >= cutoff).count() {
        0 => (50, 10),
        1 => (75, 5),
        _ => (100, 0),
    }
}

/// `(factor, penalty)` from task completion, or from the project status when
/// there are no tasks to measure.
fn completion_factor(data: &ProjectData, status: Option<ProjectStatus>) -> (u8, u8) {
    if data.total_tasks() > 0 {
        let percent = data.completion_percent().round();
        let penalty = ((100.0 - percent) * 0.3).round();
        return (percent as u8, penalty as u8);
    }
    match status {
        Some(ProjectStatus::Completed) | None => (100, 0),
        Some(ProjectStatus::Active) => (80, 6),
        Some(ProjectStatus::InProgress) => (60, 12),
        Some(ProjectStatus::Paused) => (30, 21),
    }
}

/// `(factor, penalty)` for incomplete direct dependencies. The penalty is 4 per
/// dependency and is not capped here; the factor floors at 30.
fn dependency_factor(incomplete: usize) -> (u8, i64) {
    let incomplete = incomplete as i64;
    let factor = (100 - incomplete * 20).max(30);
    (factor as u8, incomplete * 4)
}
