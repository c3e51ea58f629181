use std::collections::BTreeMap;

use chrono::{Days, NaiveDate};

use crate::model::HealthSnapshot;

pub const DEFAULT_SERIES_DAYS: usize = 30;

/// Longest series returned, about a century of days.
pub const MAX_SERIES_DAYS: usize = 36_600;

/// Score assumed before a project has any recorded history.
const BASELINE_SCORE: u8 = 100;

/// Exactly `days` daily scores ending at `today`, oldest first. Days without a
/// snapshot carry the previous known score forward, including one recorded
/// before the window starts.
pub fn health_series(snapshots: &[HealthSnapshot], days: usize, today: NaiveDate) -> Vec<u8> {
    if days == 0 {
        return Vec::new();
    }
    let representable = (today - NaiveDate::MIN).num_days().saturating_add(1);
    let limit = MAX_SERIES_DAYS.min(usize::try_from(representable).unwrap_or(MAX_SERIES_DAYS));
    if days > limit {
        log::warn!("Health series of {days} days truncated to {limit}");
    }
    let days = days.min(limit);
    let by_date: BTreeMap<NaiveDate, u8> = snapshots
        .iter()
        .filter(|s| s.date <= today)
        .map(|s| (s.date, s.score))
        .collect();

    let Some(first) = today.checked_sub_days(Days::new(days as u64 - 1)) else {
        return Vec::new();
    };
    let mut current = by_date
        .range(..first)
        .next_back()
        .map(|(_, score)| *score)
        .unwrap_or(BASELINE_SCORE);

    (0..days)
        .map(|i| {
            let date = first + Days::new(i as u64);
            if let Some(score) = by_date.get(&date) {
                current = *score;
            }
            current
        })
        .collect()
}
