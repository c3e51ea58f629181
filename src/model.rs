use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Workflow state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Review,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Review => "review",
            TaskStatus::Done => "done",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "todo" => Some(TaskStatus::Todo),
            "in-progress" | "in_progress" | "inprogress" => Some(TaskStatus::InProgress),
            "review" => Some(TaskStatus::Review),
            "done" => Some(TaskStatus::Done),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Some(Priority::Low),
            "medium" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            _ => None,
        }
    }
}

/// Lifecycle state of a whole project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProjectStatus {
    Active,
    #[serde(rename = "In Progress")]
    InProgress,
    Paused,
    Completed,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Active => "Active",
            ProjectStatus::InProgress => "In Progress",
            ProjectStatus::Paused => "Paused",
            ProjectStatus::Completed => "Completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "active" => Some(ProjectStatus::Active),
            "in progress" | "in-progress" | "in_progress" => Some(ProjectStatus::InProgress),
            "paused" => Some(ProjectStatus::Paused),
            "completed" => Some(ProjectStatus::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub status: Option<ProjectStatus>,
    pub deadline: Option<NaiveDate>,
    pub starred: bool,
}

/// The slice of a project the dependency check needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectRef {
    pub id: String,
    pub status: Option<ProjectStatus>,
}

impl ProjectRef {
    pub fn is_complete(&self) -> bool {
        self.status == Some(ProjectStatus::Completed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub status: TaskStatus,
    pub assignee: Option<String>,
    pub due: Option<NaiveDate>,
    pub priority: Option<Priority>,
    pub milestone_id: Option<String>,
    pub estimate_hours: Option<f64>,
    /// Sum of the task's time-log hours. Maintained by the store.
    #[serde(default)]
    pub logged_hours: f64,
}

impl Task {
    pub fn new(project_id: &str, title: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            title: title.to_string(),
            status: TaskStatus::Todo,
            assignee: None,
            due: None,
            priority: None,
            milestone_id: None,
            estimate_hours: None,
            logged_hours: 0.0,
        }
    }

    pub fn is_done(&self) -> bool {
        self.status == TaskStatus::Done
    }

    /// Not done and due strictly before `today`.
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        !self.is_done() && self.due.is_some_and(|due| due < today)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeLog {
    pub id: String,
    pub task_id: String,
    pub project_id: String,
    pub hours: f64,
    pub note: Option<String>,
    pub logged_at: DateTime<Utc>,
    pub logged_by: Option<String>,
}

impl TimeLog {
    /// Build a log entry, or `None` when `hours` is not a positive finite number
    /// or an id is blank.
    pub fn new(
        task_id: &str,
        project_id: &str,
        hours: f64,
        logged_at: DateTime<Utc>,
    ) -> Option<Self> {
        if !is_valid_hours(hours) || task_id.trim().is_empty() || project_id.trim().is_empty() {
            return None;
        }
        Some(Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.to_string(),
            project_id: project_id.to_string(),
            hours,
            note: None,
            logged_at,
            logged_by: None,
        })
    }
}

pub fn is_valid_hours(hours: f64) -> bool {
    hours.is_finite() && hours > 0.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub start: Option<NaiveDate>,
    pub target: Option<NaiveDate>,
    pub description: Option<String>,
}

impl Milestone {
    pub fn new(project_id: &str, title: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            title: title.to_string(),
            start: None,
            target: None,
            description: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Create,
    Edit,
    Star,
    Unstar,
    Delete,
    Timelog,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Create => "create",
            EventType::Edit => "edit",
            EventType::Star => "star",
            EventType::Unstar => "unstar",
            EventType::Delete => "delete",
            EventType::Timelog => "timelog",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(EventType::Create),
            "edit" => Some(EventType::Edit),
            "star" => Some(EventType::Star),
            "unstar" => Some(EventType::Unstar),
            "delete" => Some(EventType::Delete),
            "timelog" => Some(EventType::Timelog),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectEvent {
    pub id: String,
    pub project_id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub data: Option<serde_json::Value>,
}

impl ProjectEvent {
    pub fn new(project_id: &str, event_type: EventType, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            event_type,
            timestamp,
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// One health score per project per calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub project_id: String,
    pub date: NaiveDate,
    pub score: u8,
}
