pub mod config;
pub mod date_util;
pub mod error;
pub mod metrics;
pub mod model;
pub mod range;
pub mod storage;

pub use config::{HealthWeights, WeightsUpdate};
pub use error::{Error, Result};
pub use metrics::{
    BurndownPoint, DailyCompletion, EstimateAccuracy, HealthReport, HealthStatus, ProjectData,
    RiskLevel, RiskReport, VelocityReport, VelocityTrend,
};
pub use model::{
    EventType, Milestone, Priority, Project, ProjectEvent, ProjectStatus, Task, TaskStatus,
    TimeLog,
};
pub use range::{parse_range, DateRange, Range};
pub use storage::Database;

use chrono::{NaiveDate, Utc};
use serde_json::json;

use storage::repository::{self, TimeLogFilter};

/// Main entry point: project bookkeeping plus the health and risk analytics
/// computed over it.
pub struct ProjectHealth {
    db: Database,
}

impl ProjectHealth {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Access the database (for direct queries in the CLI).
    pub fn db(&self) -> &Database {
        &self.db
    }

    // ── Projects ───────────────────────────────────────────────────

    pub async fn create_project(
        &self,
        name: &str,
        status: Option<ProjectStatus>,
        deadline: Option<NaiveDate>,
    ) -> Result<Project> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("project name must not be empty".into()));
        }
        let project = Project {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            status,
            deadline,
            starred: false,
        };
        let event = ProjectEvent::new(&project.id, EventType::Create, Utc::now())
            .with_data(json!({ "name": project.name }));
        self.db
            .writer()
            .call({
                let project = project.clone();
                move |conn| repository::save_project(conn, &project, &event)
            })
            .await?;
        log::info!("Created project {} ({})", project.name, project.id);
        Ok(project)
    }

    pub async fn project(&self, project_id: &str) -> Result<Project> {
        let id = project_id.to_string();
        self.db
            .reader()
            .call(move |conn| repository::get_project(conn, &id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("project {project_id}")))
    }

    /// All projects, starred first.
    pub async fn projects(&self) -> Result<Vec<Project>> {
        Ok(self
            .db
            .reader()
            .call(|conn| repository::list_projects(conn))
            .await?)
    }

    /// Persist changes to a project and record an `edit` event.
    pub async fn update_project(&self, project: &Project) -> Result<()> {
        self.project(&project.id).await?;
        self.save_project(project, EventType::Edit).await
    }

    pub async fn set_project_status(
        &self,
        project_id: &str,
        status: Option<ProjectStatus>,
    ) -> Result<Project> {
        let mut project = self.project(project_id).await?;
        project.status = status;
        self.save_project(&project, EventType::Edit).await?;
        Ok(project)
    }

    pub async fn set_project_deadline(
        &self,
        project_id: &str,
        deadline: Option<NaiveDate>,
    ) -> Result<Project> {
        let mut project = self.project(project_id).await?;
        project.deadline = deadline;
        self.save_project(&project, EventType::Edit).await?;
        Ok(project)
    }

    /// Star or unstar a project. Re-applying the current state is a no-op.
    pub async fn star_project(&self, project_id: &str, starred: bool) -> Result<Project> {
        let mut project = self.project(project_id).await?;
        if project.starred == starred {
            return Ok(project);
        }
        project.starred = starred;
        let event_type = if starred { EventType::Star } else { EventType::Unstar };
        self.save_project(&project, event_type).await?;
        Ok(project)
    }

    async fn save_project(&self, project: &Project, event_type: EventType) -> Result<()> {
        let event = ProjectEvent::new(&project.id, event_type, Utc::now()).with_data(json!({
            "name": project.name,
            "status": project.status.map(|s| s.as_str()),
            "deadline": project.deadline,
        }));
        self.db
            .writer()
            .call({
                let project = project.clone();
                move |conn| repository::save_project(conn, &project, &event)
            })
            .await?;
        Ok(())
    }

    /// Delete a project with its tasks, milestones and history. The event log
    /// keeps a `delete` entry.
    pub async fn delete_project(&self, project_id: &str) -> Result<bool> {
        let event = ProjectEvent::new(project_id, EventType::Delete, Utc::now());
        let deleted = self
            .db
            .writer()
            .call({
                let id = project_id.to_string();
                move |conn| {
                    let deleted = repository::delete_project(conn, &id)?;
                    if deleted {
                        repository::append_event(conn, &event)?;
                    }
                    Ok::<bool, rusqlite::Error>(deleted)
                }
            })
            .await?;
        if deleted {
            log::info!("Deleted project {project_id}");
        }
        Ok(deleted)
    }

    // ── Tasks ──────────────────────────────────────────────────────

    pub async fn add_task(&self, task: Task) -> Result<Task> {
        validate_task(&task)?;
        self.project(&task.project_id).await?;
        self.db
            .writer()
            .call({
                let task = task.clone();
                move |conn| repository::upsert_task(conn, &task)
            })
            .await?;
        log::debug!("Added task {} to project {}", task.id, task.project_id);
        Ok(task)
    }

    pub async fn task(&self, task_id: &str) -> Result<Task> {
        let id = task_id.to_string();
        self.db
            .reader()
            .call(move |conn| repository::get_task(conn, &id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("task {task_id}")))
    }

    pub async fn tasks(&self, project_id: &str) -> Result<Vec<Task>> {
        let id = project_id.to_string();
        Ok(self
            .db
            .reader()
            .call(move |conn| repository::list_tasks(conn, &id))
            .await?)
    }

    /// Update an existing task. Its logged hours are left untouched. Moving
    /// the task to another project moves its time logs too.
    pub async fn update_task(&self, task: &Task) -> Result<()> {
        validate_task(task)?;
        let current = self.task(&task.id).await?;
        if current.project_id != task.project_id {
            self.project(&task.project_id).await?;
            log::debug!(
                "Moving task {} from project {} to {}",
                task.id,
                current.project_id,
                task.project_id
            );
        }
        self.db
            .writer()
            .call({
                let task = task.clone();
                move |conn| repository::upsert_task(conn, &task)
            })
            .await?;
        Ok(())
    }

    pub async fn set_task_status(&self, task_id: &str, status: TaskStatus) -> Result<Task> {
        let mut task = self.task(task_id).await?;
        task.status = status;
        self.update_task(&task).await?;
        Ok(task)
    }

    pub async fn delete_task(&self, task_id: &str) -> Result<bool> {
        let id = task_id.to_string();
        Ok(self
            .db
            .writer()
            .call(move |conn| repository::delete_task(conn, &id))
            .await?)
    }

    // ── Time logs ──────────────────────────────────────────────────

    /// Log `hours` against a task.
    ///
    /// Returns `None` without writing anything when `hours` is not a positive
    /// finite number or the task does not exist. On success the task's logged
    /// total is updated in the same transaction and a `timelog` event is
    /// recorded on its project.
    pub async fn log_time(
        &self,
        task_id: &str,
        hours: f64,
        note: Option<&str>,
        logged_by: Option<&str>,
    ) -> Result<Option<TimeLog>> {
        if !model::is_valid_hours(hours) {
            log::debug!("Rejected time log of {hours}h for task {task_id}");
            return Ok(None);
        }
        let task_id = task_id.to_string();
        let note = note.map(str::to_string);
        let logged_by = logged_by.map(str::to_string);

        let logged = self
            .db
            .writer()
            .call(move |conn| {
                let Some(task) = repository::get_task(conn, &task_id)? else {
                    return Ok(None);
                };
                let now = Utc::now();
                let Some(mut entry) = TimeLog::new(&task.id, &task.project_id, hours, now) else {
                    return Ok(None);
                };
                entry.note = note;
                entry.logged_by = logged_by;

                let logged = repository::append_time_log_with_event(conn, &entry, |total| {
                    Some(
                        ProjectEvent::new(&task.project_id, EventType::Timelog, now).with_data(
                            json!({ "task_id": task.id, "hours": hours, "total_hours": total }),
                        ),
                    )
                })?;
                Ok::<Option<TimeLog>, rusqlite::Error>(logged.map(|_| entry))
            })
            .await?;

        if let Some(entry) = &logged {
            log::debug!("Logged {}h on task {}", entry.hours, entry.task_id);
        }
        Ok(logged)
    }

    /// Time logs for a task, oldest first.
    pub async fn time_logs(&self, task_id: &str) -> Result<Vec<TimeLog>> {
        let id = task_id.to_string();
        Ok(self
            .db
            .reader()
            .call(move |conn| repository::list_time_logs(conn, TimeLogFilter::Task(&id)))
            .await?)
    }

    // ── Milestones ─────────────────────────────────────────────────

    pub async fn add_milestone(&self, milestone: Milestone) -> Result<Milestone> {
        if milestone.title.trim().is_empty() {
            return Err(Error::InvalidInput("milestone title must not be empty".into()));
        }
        if let (Some(start), Some(target)) = (milestone.start, milestone.target) {
            if start > target {
                return Err(Error::InvalidInput(format!(
                    "milestone starts ({start}) after its target ({target})"
                )));
            }
        }
        self.project(&milestone.project_id).await?;
        self.db
            .writer()
            .call({
                let milestone = milestone.clone();
                move |conn| repository::upsert_milestone(conn, &milestone)
            })
            .await?;
        Ok(milestone)
    }

    pub async fn milestones(&self, project_id: &str) -> Result<Vec<Milestone>> {
        let id = project_id.to_string();
        Ok(self
            .db
            .reader()
            .call(move |conn| repository::list_milestones(conn, &id))
            .await?)
    }

    pub async fn delete_milestone(&self, milestone_id: &str) -> Result<bool> {
        let id = milestone_id.to_string();
        Ok(self
            .db
            .writer()
            .call(move |conn| repository::delete_milestone(conn, &id))
            .await?)
    }

    // ── Dependencies ───────────────────────────────────────────────

    pub async fn dependencies(&self, project_id: &str) -> Result<Vec<String>> {
        let id = project_id.to_string();
        Ok(self
            .db
            .reader()
            .call(move |conn| repository::get_dependencies(conn, &id))
            .await?)
    }

    /// Replace a project's direct dependencies. Returns the stored list.
    pub async fn set_dependencies(&self, project_id: &str, depends_on: &[String]) -> Result<Vec<String>> {
        self.project(project_id).await?;
        let id = project_id.to_string();
        let depends_on = depends_on.to_vec();
        Ok(self
            .db
            .writer()
            .call(move |conn| repository::set_dependencies(conn, &id, &depends_on))
            .await?)
    }

    // ── Events ─────────────────────────────────────────────────────

    /// A project's event log, newest first.
    pub async fn events(&self, project_id: &str) -> Result<Vec<ProjectEvent>> {
        let id = project_id.to_string();
        Ok(self
            .db
            .reader()
            .call(move |conn| repository::list_events(conn, &id))
            .await?)
    }

    // ── Weights ────────────────────────────────────────────────────

    pub async fn weights(&self) -> Result<HealthWeights> {
        Ok(self
            .db
            .reader()
            .call(|conn| repository::get_weights(conn))
            .await?)
    }

    /// Apply a partial update to the stored weights and return the result.
    pub async fn set_weights(&self, update: &WeightsUpdate) -> Result<HealthWeights> {
        let update = update.clone();
        let weights = self
            .db
            .writer()
            .call(move |conn| repository::set_weights(conn, &update))
            .await?;
        log::info!("Health weights now {weights:?}");
        Ok(weights)
    }

    // ── Analytics ──────────────────────────────────────────────────

    /// Current health. With `snapshot`, today's score is also recorded.
    pub async fn health(&self, project_id: &str, snapshot: bool) -> Result<HealthReport> {
        let now = Utc::now();
        let report = metrics::compute_health(&self.db, project_id, now).await?;
        if snapshot {
            metrics::record_health_snapshot(&self.db, project_id, report.score, now.date_naive())
                .await?;
        }
        Ok(report)
    }

    pub async fn risk(&self, project_id: &str) -> Result<RiskReport> {
        metrics::compute_risk(&self.db, project_id, Utc::now()).await
    }

    pub async fn velocity(&self, project_id: &str, weeks: usize) -> Result<VelocityReport> {
        self.project(project_id).await?;
        Ok(metrics::compute_velocity(&self.db, project_id, weeks, Utc::now()).await)
    }

    pub async fn burndown(&self, project_id: &str, range: DateRange) -> Result<Vec<BurndownPoint>> {
        self.project(project_id).await?;
        Ok(metrics::compute_burndown(&self.db, project_id, range.start, range.end, Utc::now()).await)
    }

    pub async fn completion_rate(&self, project_id: &str, days: usize) -> Result<Vec<DailyCompletion>> {
        self.project(project_id).await?;
        Ok(metrics::compute_completion_rate(&self.db, project_id, days, Utc::now()).await)
    }

    pub async fn estimate_accuracy(&self, project_id: &str) -> Result<EstimateAccuracy> {
        self.project(project_id).await?;
        Ok(metrics::compute_estimate_accuracy(&self.db, project_id).await)
    }

    /// Record a health score for a specific day, replacing any earlier one.
    pub async fn snapshot_health(&self, project_id: &str, score: u8, date: NaiveDate) -> Result<()> {
        if score > 100 {
            return Err(Error::InvalidInput(format!("health score {score} exceeds 100")));
        }
        metrics::record_health_snapshot(&self.db, project_id, score, date).await
    }

    /// Daily health scores for the last `days` days, oldest first.
    pub async fn health_series(&self, project_id: &str, days: usize) -> Result<Vec<u8>> {
        let today = Utc::now().date_naive();
        Ok(metrics::compute_health_series(&self.db, project_id, days, today).await)
    }

    // ── Config ─────────────────────────────────────────────────────

    pub async fn config_get(&self, key: &str) -> Result<Option<String>> {
        self.db
            .reader()
            .call({
                let key = key.to_string();
                move |conn| repository::get_config(conn, &key)
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub async fn config_set(&self, key: &str, value: &str) -> Result<()> {
        self.db
            .writer()
            .call({
                let key = key.to_string();
                let value = value.to_string();
                move |conn| repository::set_config(conn, &key, &value)
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub async fn config_list(&self) -> Result<Vec<(String, String)>> {
        self.db
            .reader()
            .call(|conn| repository::list_config(conn))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }
}

fn validate_task(task: &Task) -> Result<()> {
    if task.title.trim().is_empty() {
        return Err(Error::InvalidInput("task title must not be empty".into()));
    }
    if let Some(estimate) = task.estimate_hours {
        if !estimate.is_finite() || estimate < 0.0 {
            return Err(Error::InvalidInput(format!(
                "estimate must be a non-negative number of hours, got {estimate}"
            )));
        }
    }
    Ok(())
}
