pub mod accuracy;
pub mod burndown;
pub mod health;
pub mod history;
pub mod risk;
pub mod types;
pub mod velocity;

pub use types::*;

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::{Error, Result};
use crate::model::{Milestone, Project, ProjectEvent, ProjectRef, Task, TimeLog};
use crate::storage::repository::{self, TimeLogFilter};
use crate::storage::Database;

/// Point-in-time view of everything the scorers read for one project.
#[derive(Debug, Clone, Default)]
pub struct ProjectData {
    pub project_id: String,
    pub tasks: Vec<Task>,
    /// Oldest first.
    pub time_logs: Vec<TimeLog>,
    pub milestones: Vec<Milestone>,
    /// Newest first.
    pub events: Vec<ProjectEvent>,
    /// Known direct dependencies with their current status.
    pub dependencies: Vec<ProjectRef>,
}

impl ProjectData {
    pub fn empty(project_id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            ..Default::default()
        }
    }

    /// Read a consistent snapshot of a project's stores. All reads share one
    /// transaction so a concurrent write lands either entirely before or after.
    pub fn load(conn: &rusqlite::Connection, project_id: &str) -> std::result::Result<Self, rusqlite::Error> {
        let tx = conn.unchecked_transaction()?;
        let dependency_ids = repository::get_dependencies(&tx, project_id)?;
        let data = Self {
            project_id: project_id.to_string(),
            tasks: repository::list_tasks(&tx, project_id)?,
            time_logs: repository::list_time_logs(&tx, TimeLogFilter::Project(project_id))?,
            milestones: repository::list_milestones(&tx, project_id)?,
            events: repository::list_events(&tx, project_id)?,
            dependencies: repository::get_projects_by_ids(&tx, &dependency_ids)?,
        };
        tx.commit()?;
        Ok(data)
    }

    pub fn total_tasks(&self) -> usize {
        self.tasks.len()
    }

    pub fn done_tasks(&self) -> usize {
        self.tasks.iter().filter(|t| t.is_done()).count()
    }

    /// Percentage of tasks done; 0 for a project without tasks.
    pub fn completion_percent(&self) -> f64 {
        percent(self.done_tasks(), self.total_tasks())
    }

    pub fn overdue_tasks(&self, today: NaiveDate) -> usize {
        self.tasks.iter().filter(|t| t.is_overdue(today)).count()
    }

    /// Percentage of a milestone's linked tasks that are done; 0 with none linked.
    pub fn milestone_completion(&self, milestone: &Milestone) -> f64 {
        let linked: Vec<&Task> = self
            .tasks
            .iter()
            .filter(|t| t.milestone_id.as_deref() == Some(milestone.id.as_str()))
            .collect();
        percent(linked.iter().filter(|t| t.is_done()).count(), linked.len())
    }

    /// Milestones whose target date has passed with linked work still open.
    pub fn overdue_milestones(&self, today: NaiveDate) -> usize {
        self.milestones
            .iter()
            .filter(|m| m.target.is_some_and(|target| target < today))
            .filter(|m| self.milestone_completion(m) < 100.0)
            .count()
    }

    pub fn incomplete_dependencies(&self) -> usize {
        self.dependencies.iter().filter(|d| !d.is_complete()).count()
    }

    /// Timestamp of the most recent log per task.
    pub fn last_log_by_task(&self) -> HashMap<&str, DateTime<Utc>> {
        let mut last: HashMap<&str, DateTime<Utc>> = HashMap::new();
        for entry in &self.time_logs {
            last.entry(entry.task_id.as_str())
                .and_modify(|at| *at = (*at).max(entry.logged_at))
                .or_insert(entry.logged_at);
        }
        last
    }
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// Load a project's data, degrading to an empty snapshot if the store can't be read.
pub async fn load_project_data(db: &Database, project_id: &str) -> ProjectData {
    let id = project_id.to_string();
    let loaded = db
        .reader()
        .call(move |conn| ProjectData::load(conn, &id))
        .await;
    match loaded {
        Ok(data) => {
            log::debug!(
                "Loaded project {project_id}: {} tasks, {} logs, {} milestones, {} events",
                data.tasks.len(),
                data.time_logs.len(),
                data.milestones.len(),
                data.events.len()
            );
            data
        }
        Err(e) => {
            log::warn!("Could not load data for project {project_id}, using empty data: {e}");
            ProjectData::empty(project_id)
        }
    }
}

async fn get_project(db: &Database, project_id: &str) -> Result<Project> {
    let id = project_id.to_string();
    db.reader()
        .call(move |conn| repository::get_project(conn, &id))
        .await?
        .ok_or_else(|| Error::NotFound(format!("project {project_id}")))
}

/// Compute a project's health with the stored weights.
pub async fn compute_health(db: &Database, project_id: &str, now: DateTime<Utc>) -> Result<HealthReport> {
    let project = get_project(db, project_id).await?;
    let weights = db.reader().call(|conn| repository::get_weights(conn)).await?;
    let data = load_project_data(db, project_id).await;
    Ok(health::calculate_health(&project, &data, &weights, now))
}

/// Compute a project's risk against its stored deadline.
pub async fn compute_risk(db: &Database, project_id: &str, now: DateTime<Utc>) -> Result<RiskReport> {
    let project = get_project(db, project_id).await?;
    let data = load_project_data(db, project_id).await;
    Ok(risk::calculate_risk(&data, project.deadline, now))
}

pub async fn compute_velocity(
    db: &Database,
    project_id: &str,
    weeks: usize,
    now: DateTime<Utc>,
) -> VelocityReport {
    let data = load_project_data(db, project_id).await;
    velocity::calculate_velocity(&data, weeks, now)
}

pub async fn compute_completion_rate(
    db: &Database,
    project_id: &str,
    days: usize,
    now: DateTime<Utc>,
) -> Vec<DailyCompletion> {
    let data = load_project_data(db, project_id).await;
    velocity::completion_rate(&data, days, now)
}

pub async fn compute_burndown(
    db: &Database,
    project_id: &str,
    start: NaiveDate,
    end: NaiveDate,
    now: DateTime<Utc>,
) -> Vec<BurndownPoint> {
    let data = load_project_data(db, project_id).await;
    burndown::calculate_burndown(&data, start, end, now)
}

pub async fn compute_estimate_accuracy(db: &Database, project_id: &str) -> EstimateAccuracy {
    let data = load_project_data(db, project_id).await;
    accuracy::estimate_accuracy(&data.tasks)
}

/// Store `score` as the project's health for `date`.
pub async fn record_health_snapshot(
    db: &Database,
    project_id: &str,
    score: u8,
    date: NaiveDate,
) -> Result<()> {
    let id = project_id.to_string();
    db.writer()
        .call(move |conn| repository::upsert_health_snapshot(conn, &id, date, score))
        .await?;
    Ok(())
}

/// Daily health scores for the `days` days ending `today`.
pub async fn compute_health_series(
    db: &Database,
    project_id: &str,
    days: usize,
    today: NaiveDate,
) -> Vec<u8> {
    let id = project_id.to_string();
    let snapshots = db
        .reader()
        .call(move |conn| repository::list_health_snapshots(conn, &id, today))
        .await
        .unwrap_or_else(|e| {
            log::warn!("Could not read health history for {project_id}: {e}");
            Vec::new()
        });
    history::health_series(&snapshots, days, today)
}
