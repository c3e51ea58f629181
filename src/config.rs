use serde::{Deserialize, Serialize};

/// `app_config` key under which the health weights are stored as JSON.
pub const WEIGHTS_CONFIG_KEY: &str = "health_weights";

/// Tunable penalties applied by the health scorer on top of its fixed factors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthWeights {
    pub overdue_penalty_per_task: u32,
    pub overdue_penalty_cap: u32,
    pub milestone_overdue_penalty_per_milestone: u32,
    pub milestone_overdue_penalty_cap: u32,
}

impl Default for HealthWeights {
    fn default() -> Self {
        Self {
            overdue_penalty_per_task: 2,
            overdue_penalty_cap: 20,
            milestone_overdue_penalty_per_milestone: 3,
            milestone_overdue_penalty_cap: 15,
        }
    }
}

impl HealthWeights {
    pub fn overdue_task_penalty(&self, overdue: usize) -> u32 {
        capped_penalty(overdue, self.overdue_penalty_per_task, self.overdue_penalty_cap)
    }

    pub fn overdue_milestone_penalty(&self, overdue: usize) -> u32 {
        capped_penalty(
            overdue,
            self.milestone_overdue_penalty_per_milestone,
            self.milestone_overdue_penalty_cap,
        )
    }

    /// Merge a partial update over these weights.
    pub fn apply(&self, update: &WeightsUpdate) -> Self {
        Self {
            overdue_penalty_per_task: update
                .overdue_penalty_per_task
                .unwrap_or(self.overdue_penalty_per_task),
            overdue_penalty_cap: update.overdue_penalty_cap.unwrap_or(self.overdue_penalty_cap),
            milestone_overdue_penalty_per_milestone: update
                .milestone_overdue_penalty_per_milestone
                .unwrap_or(self.milestone_overdue_penalty_per_milestone),
            milestone_overdue_penalty_cap: update
                .milestone_overdue_penalty_cap
                .unwrap_or(self.milestone_overdue_penalty_cap),
        }
    }
}

fn capped_penalty(count: usize, per_item: u32, cap: u32) -> u32 {
    let count = u32::try_from(count).unwrap_or(u32::MAX);
    count.saturating_mul(per_item).min(cap)
}

/// Partial weights update; `None` fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightsUpdate {
    pub overdue_penalty_per_task: Option<u32>,
    pub overdue_penalty_cap: Option<u32>,
    pub milestone_overdue_penalty_per_milestone: Option<u32>,
    pub milestone_overdue_penalty_cap: Option<u32>,
}

impl WeightsUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
