use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

/// Health category derived from the 0-100 score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Critical,
    Warning,
    Good,
    Excellent,
}

impl HealthStatus {
    pub fn from_score(score: u8) -> Self {
        if score >= 85 {
            HealthStatus::Excellent
        } else if score >= 65 {
            HealthStatus::Good
        } else if score >= 40 {
            HealthStatus::Warning
        } else {
            HealthStatus::Critical
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Critical => "critical",
            HealthStatus::Warning => "warning",
            HealthStatus::Good => "good",
            HealthStatus::Excellent => "excellent",
        }
    }
}

/// Per-factor scores (0-100, higher is healthier).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthFactors {
    pub deadline: u8,
    pub activity: u8,
    pub dependencies: u8,
    pub completion: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub project_id: String,
    pub score: u8,
    pub status: HealthStatus,
    pub factors: HealthFactors,
    pub overdue_tasks: usize,
    pub overdue_milestones: usize,
    pub incomplete_dependencies: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 70.0 {
            RiskLevel::Critical
        } else if score >= 50.0 {
            RiskLevel::High
        } else if score >= 30.0 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

/// Unweighted risk contributions (0-100, higher is riskier).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RiskFactors {
    pub overdue: f64,
    pub velocity: f64,
    pub blockers: f64,
    pub deadline: f64,
    pub estimate_accuracy: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskReport {
    pub project_id: String,
    pub score: f64,
    pub level: RiskLevel,
    pub factors: RiskFactors,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VelocityTrend {
    Up,
    Down,
    Stable,
}

/// One trailing seven-day bucket, `(start, end]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VelocityWeek {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Distinct tasks with at least one time log in the bucket.
    pub completed: usize,
    /// Sum of those tasks' estimates, 1 per unestimated task.
    pub points: f64,
    /// Mean `completed` over this bucket and up to two before it.
    pub rolling_average: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VelocityReport {
    pub weeks: Vec<VelocityWeek>,
    pub average_completed: f64,
    pub trend: VelocityTrend,
}

impl VelocityReport {
    pub fn current(&self) -> Option<&VelocityWeek> {
        self.weeks.last()
    }

    pub fn previous(&self) -> Option<&VelocityWeek> {
        self.weeks.len().checked_sub(2).map(|i| &self.weeks[i])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BurndownPoint {
    pub date: NaiveDate,
    pub ideal: f64,
    pub actual: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyCompletion {
    pub date: NaiveDate,
    pub completed: usize,
    /// `completed` divided by the project's task count.
    pub rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccuracyClass {
    Over,
    Under,
    Accurate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskAccuracy {
    pub task_id: String,
    pub title: String,
    pub estimate_hours: f64,
    pub logged_hours: f64,
    /// `(logged - estimate) / estimate * 100`.
    pub variance: f64,
    pub class: AccuracyClass,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EstimateAccuracy {
    pub tasks: Vec<TaskAccuracy>,
    /// Mean absolute variance, in percent.
    pub average_variance: f64,
    pub over_count: usize,
    pub under_count: usize,
    pub accurate_count: usize,
    /// Percentage of tasks classified accurate.
    pub accuracy_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_status_thresholds() {
        assert_eq!(HealthStatus::from_score(100), HealthStatus::Excellent);
        assert_eq!(HealthStatus::from_score(85), HealthStatus::Excellent);
        assert_eq!(HealthStatus::from_score(84), HealthStatus::Good);
        assert_eq!(HealthStatus::from_score(65), HealthStatus::Good);
        assert_eq!(HealthStatus::from_score(64), HealthStatus::Warning);
        assert_eq!(HealthStatus::from_score(40), HealthStatus::Warning);
        assert_eq!(HealthStatus::from_score(39), HealthStatus::Critical);
        assert_eq!(HealthStatus::from_score(0), HealthStatus::Critical);
    }

    #[test]
    fn test_risk_level_thresholds() {
        assert_eq!(RiskLevel::from_score(0.0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(29.9), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(30.0), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(50.0), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(70.0), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(100.5), RiskLevel::Critical);
    }
}
