use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::config::{HealthWeights, WeightsUpdate, WEIGHTS_CONFIG_KEY};
use crate::date_util::{date_key, parse_date, parse_timestamp, timestamp_key};
use crate::model::{
    is_valid_hours, EventType, HealthSnapshot, Milestone, Priority, Project, ProjectEvent,
    ProjectRef, ProjectStatus, Task, TaskStatus, TimeLog,
};

// ── Projects ───────────────────────────────────────────────────────

pub fn upsert_project(conn: &Connection, project: &Project) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO projects (project_id, name, status, deadline, is_starred, created_at, modified_at)
         VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'), datetime('now'))
         ON CONFLICT(project_id) DO UPDATE SET
            name=excluded.name, status=excluded.status, deadline=excluded.deadline,
            is_starred=excluded.is_starred, modified_at=excluded.modified_at",
        params![
            project.id,
            project.name,
            project.status.map(|s| s.as_str()),
            project.deadline.map(date_key),
            project.starred as i32,
        ],
    )?;
    Ok(())
}

pub fn get_project(conn: &Connection, project_id: &str) -> Result<Option<Project>, rusqlite::Error> {
    conn.query_row(
        "SELECT project_id, name, status, deadline, is_starred FROM projects WHERE project_id = ?1",
        params![project_id],
        project_from_row,
    )
    .optional()
}

pub fn list_projects(conn: &Connection) -> Result<Vec<Project>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT project_id, name, status, deadline, is_starred FROM projects
         ORDER BY is_starred DESC, name",
    )?;
    let rows = stmt.query_map([], project_from_row)?;
    rows.collect()
}

/// Look up id and status for each known project in `ids`. Unknown ids are
/// omitted from the result.
pub fn get_projects_by_ids(
    conn: &Connection,
    ids: &[String],
) -> Result<Vec<ProjectRef>, rusqlite::Error> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!(
        "SELECT project_id, status FROM projects WHERE project_id IN ({placeholders})
         ORDER BY project_id"
    );
    let mut stmt = conn.prepare(&sql)?;
    for (i, id) in ids.iter().enumerate() {
        stmt.raw_bind_parameter(i + 1, id)?;
    }
    let mut refs = Vec::new();
    let mut rows = stmt.raw_query();
    while let Some(row) = rows.next()? {
        let status: Option<String> = row.get(1)?;
        refs.push(ProjectRef {
            id: row.get(0)?,
            status: status.as_deref().and_then(ProjectStatus::parse),
        });
    }
    Ok(refs)
}

/// Upsert a project and record `event` for the change in one transaction.
pub fn save_project(
    conn: &Connection,
    project: &Project,
    event: &ProjectEvent,
) -> Result<(), rusqlite::Error> {
    let tx = conn.unchecked_transaction()?;
    upsert_project(&tx, project)?;
    append_event(&tx, event)?;
    tx.commit()
}

/// Remove a project and everything owned by it. Events are kept: the log is
/// append-only and records the deletion itself.
pub fn delete_project(conn: &Connection, project_id: &str) -> Result<bool, rusqlite::Error> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM tasks WHERE project_id = ?1", params![project_id])?;
    tx.execute("DELETE FROM milestones WHERE project_id = ?1", params![project_id])?;
    tx.execute(
        "DELETE FROM project_dependencies WHERE project_id = ?1",
        params![project_id],
    )?;
    tx.execute(
        "DELETE FROM health_snapshots WHERE project_id = ?1",
        params![project_id],
    )?;
    let count = tx.execute("DELETE FROM projects WHERE project_id = ?1", params![project_id])?;
    tx.commit()?;
    Ok(count > 0)
}

fn project_from_row(row: &Row<'_>) -> Result<Project, rusqlite::Error> {
    let status: Option<String> = row.get(2)?;
    let deadline: Option<String> = row.get(3)?;
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        status: status.as_deref().and_then(ProjectStatus::parse),
        deadline: deadline.as_deref().and_then(parse_date),
        starred: row.get(4)?,
    })
}

// ── Tasks ──────────────────────────────────────────────────────────

/// Insert or update a task. `logged_hours` is owned by the time-log store and
/// is never taken from the caller. When the task moves to another project its
/// time logs move with it.
pub fn upsert_task(conn: &Connection, task: &Task) -> Result<(), rusqlite::Error> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO tasks (
            task_id, project_id, title, status, assignee, due_on, priority,
            milestone_id, estimate_hours, logged_hours, created_at, modified_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, datetime('now'), datetime('now'))
        ON CONFLICT(task_id) DO UPDATE SET
            project_id=excluded.project_id, title=excluded.title, status=excluded.status,
            assignee=excluded.assignee, due_on=excluded.due_on, priority=excluded.priority,
            milestone_id=excluded.milestone_id, estimate_hours=excluded.estimate_hours,
            modified_at=excluded.modified_at",
        params![
            task.id,
            task.project_id,
            task.title,
            task.status.as_str(),
            task.assignee,
            task.due.map(date_key),
            task.priority.map(|p| p.as_str()),
            task.milestone_id,
            task.estimate_hours.filter(|h| h.is_finite()),
        ],
    )?;
    tx.execute(
        "UPDATE time_logs SET project_id = ?2 WHERE task_id = ?1 AND project_id <> ?2",
        params![task.id, task.project_id],
    )?;
    tx.commit()
}

const TASK_COLUMNS: &str = "task_id, project_id, title, status, assignee, due_on, priority,
    milestone_id, estimate_hours, logged_hours";

pub fn get_task(conn: &Connection, task_id: &str) -> Result<Option<Task>, rusqlite::Error> {
    conn.query_row(
        &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE task_id = ?1"),
        params![task_id],
        task_from_row,
    )
    .optional()
}

pub fn list_tasks(conn: &Connection, project_id: &str) -> Result<Vec<Task>, rusqlite::Error> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks WHERE project_id = ?1 ORDER BY created_at, task_id"
    ))?;
    let rows = stmt.query_map(params![project_id], task_from_row)?;
    rows.collect()
}

/// Delete a task together with its time logs.
pub fn delete_task(conn: &Connection, task_id: &str) -> Result<bool, rusqlite::Error> {
    let count = conn.execute("DELETE FROM tasks WHERE task_id = ?1", params![task_id])?;
    Ok(count > 0)
}

fn task_from_row(row: &Row<'_>) -> Result<Task, rusqlite::Error> {
    let status: String = row.get(3)?;
    let due: Option<String> = row.get(5)?;
    let priority: Option<String> = row.get(6)?;
    let task_id: String = row.get(0)?;
    let status = TaskStatus::parse(&status).unwrap_or_else(|| {
        log::warn!("Task {task_id} has unknown status '{status}', treating as todo");
        TaskStatus::Todo
    });
    Ok(Task {
        id: task_id,
        project_id: row.get(1)?,
        title: row.get(2)?,
        status,
        assignee: row.get(4)?,
        due: due.as_deref().and_then(parse_date),
        priority: priority.as_deref().and_then(Priority::parse),
        milestone_id: row.get(7)?,
        estimate_hours: row.get(8)?,
        logged_hours: row.get(9)?,
    })
}

// ── Time Logs ──────────────────────────────────────────────────────

/// Which time logs to list.
#[derive(Debug, Clone, Copy)]
pub enum TimeLogFilter<'a> {
    Task(&'a str),
    Project(&'a str),
}

/// Append a time log and refresh the task's `logged_hours` in the same
/// transaction. Returns the task's new total, or `None` when the entry was
/// rejected (non-positive hours or unknown task) and nothing was written.
pub fn append_time_log(conn: &Connection, entry: &TimeLog) -> Result<Option<f64>, rusqlite::Error> {
    append_time_log_with_event(conn, entry, |_| None)
}

/// Like [`append_time_log`], also recording the event built by `event` from
/// the new total. Nothing is written unless both the log and the event are.
pub fn append_time_log_with_event(
    conn: &Connection,
    entry: &TimeLog,
    event: impl FnOnce(f64) -> Option<ProjectEvent>,
) -> Result<Option<f64>, rusqlite::Error> {
    if !is_valid_hours(entry.hours) {
        return Ok(None);
    }
    let tx = conn.unchecked_transaction()?;
    let exists: Option<String> = tx
        .query_row(
            "SELECT task_id FROM tasks WHERE task_id = ?1",
            params![entry.task_id],
            |row| row.get(0),
        )
        .optional()?;
    if exists.is_none() {
        return Ok(None);
    }
    tx.execute(
        "INSERT INTO time_logs (log_id, task_id, project_id, hours, note, logged_at, logged_by)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            entry.id,
            entry.task_id,
            entry.project_id,
            entry.hours,
            entry.note,
            timestamp_key(entry.logged_at),
            entry.logged_by,
        ],
    )?;
    tx.execute(
        "UPDATE tasks SET
            logged_hours = (SELECT COALESCE(SUM(hours), 0) FROM time_logs WHERE task_id = ?1),
            modified_at = datetime('now')
         WHERE task_id = ?1",
        params![entry.task_id],
    )?;
    let total: f64 = tx.query_row(
        "SELECT logged_hours FROM tasks WHERE task_id = ?1",
        params![entry.task_id],
        |row| row.get(0),
    )?;
    if let Some(event) = event(total) {
        append_event(&tx, &event)?;
    }
    tx.commit()?;
    Ok(Some(total))
}

/// List time logs oldest first.
pub fn list_time_logs(
    conn: &Connection,
    filter: TimeLogFilter<'_>,
) -> Result<Vec<TimeLog>, rusqlite::Error> {
    let (column, value) = match filter {
        TimeLogFilter::Task(id) => ("task_id", id),
        TimeLogFilter::Project(id) => ("project_id", id),
    };
    let mut stmt = conn.prepare(&format!(
        "SELECT log_id, task_id, project_id, hours, note, logged_at, logged_by
         FROM time_logs WHERE {column} = ?1 ORDER BY logged_at, log_id"
    ))?;
    let mut logs = Vec::new();
    let mut rows = stmt.query(params![value])?;
    while let Some(row) = rows.next()? {
        let log_id: String = row.get(0)?;
        let logged_at: String = row.get(5)?;
        let Some(logged_at) = parse_timestamp(&logged_at) else {
            log::warn!("Skipping time log {log_id} with malformed timestamp '{logged_at}'");
            continue;
        };
        logs.push(TimeLog {
            id: log_id,
            task_id: row.get(1)?,
            project_id: row.get(2)?,
            hours: row.get(3)?,
            note: row.get(4)?,
            logged_at,
            logged_by: row.get(6)?,
        });
    }
    Ok(logs)
}

// ── Milestones ─────────────────────────────────────────────────────

pub fn upsert_milestone(conn: &Connection, milestone: &Milestone) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO milestones (milestone_id, project_id, title, start_on, target_on, description)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(milestone_id) DO UPDATE SET
            project_id=excluded.project_id, title=excluded.title, start_on=excluded.start_on,
            target_on=excluded.target_on, description=excluded.description",
        params![
            milestone.id,
            milestone.project_id,
            milestone.title,
            milestone.start.map(date_key),
            milestone.target.map(date_key),
            milestone.description,
        ],
    )?;
    Ok(())
}

pub fn list_milestones(conn: &Connection, project_id: &str) -> Result<Vec<Milestone>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT milestone_id, project_id, title, start_on, target_on, description
         FROM milestones WHERE project_id = ?1 ORDER BY target_on IS NULL, target_on, title",
    )?;
    let rows = stmt.query_map(params![project_id], |row| {
        let start: Option<String> = row.get(3)?;
        let target: Option<String> = row.get(4)?;
        Ok(Milestone {
            id: row.get(0)?,
            project_id: row.get(1)?,
            title: row.get(2)?,
            start: start.as_deref().and_then(parse_date),
            target: target.as_deref().and_then(parse_date),
            description: row.get(5)?,
        })
    })?;
    rows.collect()
}

/// Delete a milestone and unlink its tasks.
pub fn delete_milestone(conn: &Connection, milestone_id: &str) -> Result<bool, rusqlite::Error> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE tasks SET milestone_id = NULL WHERE milestone_id = ?1",
        params![milestone_id],
    )?;
    let count = tx.execute(
        "DELETE FROM milestones WHERE milestone_id = ?1",
        params![milestone_id],
    )?;
    tx.commit()?;
    Ok(count > 0)
}

// ── Events ─────────────────────────────────────────────────────────

pub fn append_event(conn: &Connection, event: &ProjectEvent) -> Result<(), rusqlite::Error> {
    let data = event.data.as_ref().map(|d| d.to_string());
    conn.execute(
        "INSERT INTO project_events (event_id, project_id, event_type, occurred_at, data)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            event.id,
            event.project_id,
            event.event_type.as_str(),
            timestamp_key(event.timestamp),
            data,
        ],
    )?;
    Ok(())
}

/// List a project's events, newest first.
pub fn list_events(conn: &Connection, project_id: &str) -> Result<Vec<ProjectEvent>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT event_id, project_id, event_type, occurred_at, data
         FROM project_events WHERE project_id = ?1
         ORDER BY occurred_at DESC, rowid DESC",
    )?;
    let mut events = Vec::new();
    let mut rows = stmt.query(params![project_id])?;
    while let Some(row) = rows.next()? {
        let event_id: String = row.get(0)?;
        let event_type: String = row.get(2)?;
        let occurred_at: String = row.get(3)?;
        let data: Option<String> = row.get(4)?;
        let (Some(event_type), Some(timestamp)) =
            (EventType::parse(&event_type), parse_timestamp(&occurred_at))
        else {
            log::warn!("Skipping malformed event {event_id}");
            continue;
        };
        events.push(ProjectEvent {
            id: event_id,
            project_id: row.get(1)?,
            event_type,
            timestamp,
            data: data.and_then(|d| serde_json::from_str(&d).ok()),
        });
    }
    Ok(events)
}

// ── Dependencies ───────────────────────────────────────────────────

pub fn get_dependencies(conn: &Connection, project_id: &str) -> Result<Vec<String>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT depends_on FROM project_dependencies WHERE project_id = ?1 ORDER BY position",
    )?;
    let rows = stmt.query_map(params![project_id], |row| row.get(0))?;
    rows.collect()
}

/// Replace a project's direct dependencies. Blank ids, duplicates and
/// self-references are dropped. Returns the stored list.
pub fn set_dependencies(
    conn: &Connection,
    project_id: &str,
    depends_on: &[String],
) -> Result<Vec<String>, rusqlite::Error> {
    let mut cleaned: Vec<String> = Vec::new();
    for id in depends_on {
        let id = id.trim();
        if id.is_empty() || id == project_id || cleaned.iter().any(|c| c == id) {
            continue;
        }
        cleaned.push(id.to_string());
    }

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM project_dependencies WHERE project_id = ?1",
        params![project_id],
    )?;
    for (position, dep) in cleaned.iter().enumerate() {
        tx.execute(
            "INSERT INTO project_dependencies (project_id, depends_on, position) VALUES (?1, ?2, ?3)",
            params![project_id, dep, position as i64],
        )?;
    }
    tx.commit()?;
    Ok(cleaned)
}

// ── Health Snapshots ───────────────────────────────────────────────

/// Record a project's score for a day, replacing any earlier score that day.
pub fn upsert_health_snapshot(
    conn: &Connection,
    project_id: &str,
    date: NaiveDate,
    score: u8,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO health_snapshots (project_id, snapshot_date, score) VALUES (?1, ?2, ?3)
         ON CONFLICT(project_id, snapshot_date) DO UPDATE SET score=excluded.score",
        params![project_id, date_key(date), score],
    )?;
    Ok(())
}

/// Snapshots on or before `through`, oldest first.
pub fn list_health_snapshots(
    conn: &Connection,
    project_id: &str,
    through: NaiveDate,
) -> Result<Vec<HealthSnapshot>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT project_id, snapshot_date, score FROM health_snapshots
         WHERE project_id = ?1 AND snapshot_date <= ?2 ORDER BY snapshot_date",
    )?;
    let mut snapshots = Vec::new();
    let mut rows = stmt.query(params![project_id, date_key(through)])?;
    while let Some(row) = rows.next()? {
        let date: String = row.get(1)?;
        let score: i64 = row.get(2)?;
        if let Some(date) = parse_date(&date) {
            snapshots.push(HealthSnapshot {
                project_id: row.get(0)?,
                date,
                score: score.clamp(0, 100) as u8,
            });
        }
    }
    Ok(snapshots)
}

// ── Weights ────────────────────────────────────────────────────────

/// Current health weights. Missing or unreadable config falls back to defaults.
pub fn get_weights(conn: &Connection) -> Result<HealthWeights, rusqlite::Error> {
    let Some(raw) = get_config(conn, WEIGHTS_CONFIG_KEY)? else {
        return Ok(HealthWeights::default());
    };
    Ok(serde_json::from_str(&raw).unwrap_or_else(|e| {
        log::warn!("Ignoring malformed {WEIGHTS_CONFIG_KEY} config: {e}");
        HealthWeights::default()
    }))
}

/// Merge a partial update into the stored weights and return the result.
pub fn set_weights(conn: &Connection, update: &WeightsUpdate) -> Result<HealthWeights, rusqlite::Error> {
    let weights = get_weights(conn)?.apply(update);
    let raw = serde_json::to_string(&weights)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    set_config(conn, WEIGHTS_CONFIG_KEY, &raw)?;
    Ok(weights)
}

// ── Config ─────────────────────────────────────────────────────────

pub fn get_config(conn: &Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT value FROM app_config WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_config(conn: &Connection, key: &str, value: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR REPLACE INTO app_config (key, value, updated_at)
         VALUES (?1, ?2, datetime('now'))",
        params![key, value],
    )?;
    Ok(())
}

pub fn list_config(conn: &Connection) -> Result<Vec<(String, String)>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT key, value FROM app_config ORDER BY key")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use chrono::{TimeZone, Utc};

    fn project(id: &str, status: Option<ProjectStatus>) -> Project {
        Project {
            id: id.to_string(),
            name: format!("Project {id}"),
            status,
            deadline: None,
            starred: false,
        }
    }

    fn log_entry(task_id: &str, hours: f64) -> TimeLog {
        let at = Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap();
        TimeLog::new(task_id, "p1", hours, at).unwrap()
    }

    #[tokio::test]
    async fn test_config_round_trip() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                set_config(conn, "owner", "ops")?;
                let val = get_config(conn, "owner")?;
                assert_eq!(val, Some("ops".to_string()));

                let missing = get_config(conn, "nonexistent")?;
                assert_eq!(missing, None);
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_project_round_trip() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                let mut p = project("p1", Some(ProjectStatus::InProgress));
                p.deadline = NaiveDate::from_ymd_opt(2025, 9, 30);
                upsert_project(conn, &p)?;

                let loaded = get_project(conn, "p1")?.unwrap();
                assert_eq!(loaded.name, "Project p1");
                assert_eq!(loaded.status, Some(ProjectStatus::InProgress));
                assert_eq!(loaded.deadline, NaiveDate::from_ymd_opt(2025, 9, 30));
                assert!(!loaded.starred);

                p.starred = true;
                upsert_project(conn, &p)?;
                assert!(get_project(conn, "p1")?.unwrap().starred);
                assert!(get_project(conn, "nope")?.is_none());
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_malformed_deadline_loads_as_none() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                conn.execute(
                    "INSERT INTO projects (project_id, name, status, deadline, created_at, modified_at)
                     VALUES ('p1', 'Legacy', 'Someday', 'next week', datetime('now'), datetime('now'))",
                    [],
                )?;
                let loaded = get_project(conn, "p1")?.unwrap();
                assert_eq!(loaded.deadline, None);
                assert_eq!(loaded.status, None);
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_get_projects_by_ids_skips_unknown() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                upsert_project(conn, &project("a", Some(ProjectStatus::Completed)))?;
                upsert_project(conn, &project("b", Some(ProjectStatus::Active)))?;

                let refs = get_projects_by_ids(
                    conn,
                    &["a".to_string(), "b".to_string(), "ghost".to_string()],
                )?;
                assert_eq!(refs.len(), 2);
                assert!(refs[0].is_complete());
                assert!(!refs[1].is_complete());
                assert!(get_projects_by_ids(conn, &[])?.is_empty());
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_upsert_task_preserves_logged_hours() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                let mut task = Task::new("p1", "Design schema");
                task.estimate_hours = Some(4.0);
                upsert_task(conn, &task)?;
                append_time_log(conn, &log_entry(&task.id, 1.5))?;

                // Caller-supplied logged_hours is ignored on update.
                task.logged_hours = 99.0;
                task.status = TaskStatus::Review;
                upsert_task(conn, &task)?;

                let loaded = get_task(conn, &task.id)?.unwrap();
                assert_eq!(loaded.status, TaskStatus::Review);
                assert_eq!(loaded.logged_hours, 1.5);
                assert_eq!(loaded.estimate_hours, Some(4.0));
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_append_time_log_keeps_aggregate_consistent() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                let a = Task::new("p1", "A");
                let b = Task::new("p1", "B");
                upsert_task(conn, &a)?;
                upsert_task(conn, &b)?;

                for (task_id, hours) in [(&a.id, 1.0), (&b.id, 2.5), (&a.id, 0.75), (&a.id, 3.0)] {
                    append_time_log(conn, &log_entry(task_id, hours))?;

                    for task in list_tasks(conn, "p1")? {
                        let sum: f64 = list_time_logs(conn, TimeLogFilter::Task(&task.id))?
                            .iter()
                            .map(|l| l.hours)
                            .sum();
                        assert_eq!(sum, task.logged_hours);
                    }
                }

                assert_eq!(get_task(conn, &a.id)?.unwrap().logged_hours, 4.75);
                assert_eq!(list_time_logs(conn, TimeLogFilter::Project("p1"))?.len(), 4);
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_append_time_log_rejects_without_writing() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                let task = Task::new("p1", "A");
                upsert_task(conn, &task)?;

                let mut zero = log_entry(&task.id, 1.0);
                zero.hours = 0.0;
                assert_eq!(append_time_log(conn, &zero)?, None);

                let orphan = log_entry("missing-task", 2.0);
                assert_eq!(append_time_log(conn, &orphan)?, None);

                assert!(list_time_logs(conn, TimeLogFilter::Project("p1"))?.is_empty());
                assert_eq!(get_task(conn, &task.id)?.unwrap().logged_hours, 0.0);
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_moved_task_takes_its_logs() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                let mut task = Task::new("p1", "A");
                upsert_task(conn, &task)?;
                append_time_log(conn, &log_entry(&task.id, 2.0))?;

                task.project_id = "p2".into();
                upsert_task(conn, &task)?;

                assert!(list_time_logs(conn, TimeLogFilter::Project("p1"))?.is_empty());
                let moved = list_time_logs(conn, TimeLogFilter::Project("p2"))?;
                assert_eq!(moved.len(), 1);
                assert_eq!(moved[0].task_id, task.id);
                assert_eq!(get_task(conn, &task.id)?.unwrap().logged_hours, 2.0);
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_time_log_and_event_commit_together() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                let task = Task::new("p1", "A");
                upsert_task(conn, &task)?;
                let at = Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap();
                let taken = ProjectEvent::new("p1", EventType::Timelog, at);
                append_event(conn, &taken)?;

                let total = append_time_log_with_event(conn, &log_entry(&task.id, 1.0), |total| {
                    assert_eq!(total, 1.0);
                    Some(ProjectEvent::new("p1", EventType::Timelog, at))
                })?;
                assert_eq!(total, Some(1.0));

                // A failing event rolls the log back.
                let failed = append_time_log_with_event(conn, &log_entry(&task.id, 5.0), |_| {
                    Some(taken.clone())
                });
                assert!(failed.is_err());
                assert_eq!(list_time_logs(conn, TimeLogFilter::Task(&task.id))?.len(), 1);
                assert_eq!(get_task(conn, &task.id)?.unwrap().logged_hours, 1.0);
                assert_eq!(list_events(conn, "p1")?.len(), 2);
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_save_project_is_all_or_nothing() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                let at = Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap();
                let event = ProjectEvent::new("p1", EventType::Create, at);
                save_project(conn, &project("p1", None), &event)?;
                assert!(get_project(conn, "p1")?.is_some());
                assert_eq!(list_events(conn, "p1")?.len(), 1);

                // Reusing an event id fails the insert, so the project is not written either.
                let err = save_project(conn, &project("p2", None), &event);
                assert!(err.is_err());
                assert!(get_project(conn, "p2")?.is_none());
                assert!(conn.is_autocommit());
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_task_removes_logs() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                let task = Task::new("p1", "A");
                upsert_task(conn, &task)?;
                append_time_log(conn, &log_entry(&task.id, 2.0))?;

                assert!(delete_task(conn, &task.id)?);
                assert!(!delete_task(conn, &task.id)?);
                assert!(list_time_logs(conn, TimeLogFilter::Task(&task.id))?.is_empty());
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_milestone_unlinks_tasks() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                let mut milestone = Milestone::new("p1", "Beta");
                milestone.target = NaiveDate::from_ymd_opt(2025, 4, 1);
                upsert_milestone(conn, &milestone)?;

                let mut task = Task::new("p1", "A");
                task.milestone_id = Some(milestone.id.clone());
                upsert_task(conn, &task)?;

                let listed = list_milestones(conn, "p1")?;
                assert_eq!(listed.len(), 1);
                assert_eq!(listed[0].target, NaiveDate::from_ymd_opt(2025, 4, 1));

                assert!(delete_milestone(conn, &milestone.id)?);
                assert!(list_milestones(conn, "p1")?.is_empty());
                assert_eq!(get_task(conn, &task.id)?.unwrap().milestone_id, None);
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_events_listed_newest_first() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                let early = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
                let late = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap();
                append_event(conn, &ProjectEvent::new("p1", EventType::Create, early))?;
                append_event(
                    conn,
                    &ProjectEvent::new("p1", EventType::Timelog, late)
                        .with_data(serde_json::json!({"hours": 2.0})),
                )?;
                append_event(conn, &ProjectEvent::new("p2", EventType::Create, late))?;

                let events = list_events(conn, "p1")?;
                assert_eq!(events.len(), 2);
                assert_eq!(events[0].event_type, EventType::Timelog);
                assert_eq!(events[0].data, Some(serde_json::json!({"hours": 2.0})));
                assert_eq!(events[1].event_type, EventType::Create);
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_set_dependencies_replaces_and_cleans() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                let stored = set_dependencies(
                    conn,
                    "p1",
                    &["p2".into(), "p1".into(), " ".into(), "p3".into(), "p2".into()],
                )?;
                assert_eq!(stored, vec!["p2".to_string(), "p3".to_string()]);
                assert_eq!(get_dependencies(conn, "p1")?, stored);

                set_dependencies(conn, "p1", &["p4".into()])?;
                assert_eq!(get_dependencies(conn, "p1")?, vec!["p4".to_string()]);
                assert!(get_dependencies(conn, "p9")?.is_empty());
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_health_snapshot_upserts_by_day() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                let day = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap();
                upsert_health_snapshot(conn, "p1", day, 80)?;
                upsert_health_snapshot(conn, "p1", day, 72)?;
                upsert_health_snapshot(conn, "p1", day.succ_opt().unwrap(), 70)?;

                let through_day = list_health_snapshots(conn, "p1", day)?;
                assert_eq!(through_day.len(), 1);
                assert_eq!(through_day[0].score, 72);
                assert_eq!(list_health_snapshots(conn, "p1", day.succ_opt().unwrap())?.len(), 2);
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_weights_default_update_and_malformed() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                assert_eq!(get_weights(conn)?, HealthWeights::default());

                let updated = set_weights(
                    conn,
                    &WeightsUpdate {
                        overdue_penalty_per_task: Some(5),
                        ..Default::default()
                    },
                )?;
                assert_eq!(updated.overdue_penalty_per_task, 5);
                assert_eq!(get_weights(conn)?, updated);

                set_config(conn, WEIGHTS_CONFIG_KEY, "{not json")?;
                assert_eq!(get_weights(conn)?, HealthWeights::default());
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_project_cascades_owned_rows() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                upsert_project(conn, &project("p1", None))?;
                let task = Task::new("p1", "A");
                upsert_task(conn, &task)?;
                append_time_log(conn, &log_entry(&task.id, 1.0))?;
                upsert_milestone(conn, &Milestone::new("p1", "M"))?;
                set_dependencies(conn, "p1", &["p2".into()])?;
                append_event(conn, &ProjectEvent::new("p1", EventType::Create, Utc::now()))?;

                assert!(delete_project(conn, "p1")?);
                assert!(list_tasks(conn, "p1")?.is_empty());
                assert!(list_time_logs(conn, TimeLogFilter::Project("p1"))?.is_empty());
                assert!(list_milestones(conn, "p1")?.is_empty());
                assert!(get_dependencies(conn, "p1")?.is_empty());
                assert_eq!(list_events(conn, "p1")?.len(), 1);
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }
}
