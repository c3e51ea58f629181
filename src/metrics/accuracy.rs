use super::types::{AccuracyClass, EstimateAccuracy, TaskAccuracy};
use crate::model::Task;

/// Variance band, in percent, treated as an accurate estimate.
const ACCURATE_BAND: f64 = 10.0;

/// Compare estimates to logged effort for every task that has both.
pub fn estimate_accuracy(tasks: &[Task]) -> EstimateAccuracy {
    let entries: Vec<TaskAccuracy> = tasks.iter().filter_map(task_accuracy).collect();
    if entries.is_empty() {
        return EstimateAccuracy::default();
    }

    let count = |class: AccuracyClass| entries.iter().filter(|e| e.class == class).count();
    let over_count = count(AccuracyClass::Over);
    let under_count = count(AccuracyClass::Under);
    let accurate_count = count(AccuracyClass::Accurate);
    let n = entries.len() as f64;
    let average_variance = entries.iter().map(|e| e.variance.abs()).sum::<f64>() / n;

    EstimateAccuracy {
        average_variance,
        over_count,
        under_count,
        accurate_count,
        accuracy_rate: accurate_count as f64 / n * 100.0,
        tasks: entries,
    }
}

fn task_accuracy(task: &Task) -> Option<TaskAccuracy> {
    let estimate = task.estimate_hours.filter(|h| h.is_finite() && *h > 0.0)?;
    let logged = task.logged_hours;
    if !(logged.is_finite() && logged > 0.0) {
        return None;
    }
    let variance = (logged - estimate) / estimate * 100.0;
    let class = if variance > ACCURATE_BAND {
        AccuracyClass::Over
    } else if variance < -ACCURATE_BAND {
        AccuracyClass::Under
    } else {
        AccuracyClass::Accurate
    };
    Some(TaskAccuracy {
        task_id: task.id.clone(),
        title: task.title.clone(),
        estimate_hours: estimate,
        logged_hours: logged,
        variance,
        class,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::test_support::task;
    use crate::model::TaskStatus;

    fn estimated(id: &str, estimate: Option<f64>, logged: f64) -> Task {
        let mut t = task(id, TaskStatus::Done);
        t.estimate_hours = estimate;
        t.logged_hours = logged;
        t
    }

    #[test]
    fn test_no_qualifying_tasks() {
        let tasks = vec![
            estimated("a", None, 4.0),
            estimated("b", Some(4.0), 0.0),
            estimated("c", Some(0.0), 3.0),
        ];
        let acc = estimate_accuracy(&tasks);
        assert!(acc.tasks.is_empty());
        assert_eq!(acc.average_variance, 0.0);
        assert_eq!(acc.accuracy_rate, 0.0);
    }

    #[test]
    fn test_classification_and_aggregates() {
        let tasks = vec![
            estimated("over", Some(10.0), 15.0), // +50%
            estimated("under", Some(10.0), 5.0), // -50%
            estimated("exact", Some(10.0), 10.0),
            estimated("close", Some(8.0), 8.4), // +5%
        ];
        let acc = estimate_accuracy(&tasks);
        assert_eq!(acc.tasks.len(), 4);
        assert_eq!(acc.tasks[0].class, AccuracyClass::Over);
        assert_eq!(acc.tasks[0].variance, 50.0);
        assert_eq!(acc.tasks[1].class, AccuracyClass::Under);
        assert_eq!(acc.tasks[2].class, AccuracyClass::Accurate);
        assert_eq!(acc.tasks[3].class, AccuracyClass::Accurate);
        assert_eq!(acc.over_count, 1);
        assert_eq!(acc.under_count, 1);
        assert_eq!(acc.accurate_count, 2);
        assert_eq!(acc.accuracy_rate, 50.0);
        assert!((acc.average_variance - 26.25).abs() < 1e-9);
    }

    #[test]
    fn test_rerun_is_identical() {
        let tasks = vec![estimated("a", Some(3.0), 4.0), estimated("b", Some(7.0), 2.0)];
        let first = estimate_accuracy(&tasks);
        let second = estimate_accuracy(&tasks);
        assert_eq!(first, second);
        let variances: Vec<f64> = first.tasks.iter().map(|t| t.variance).collect();
        assert_eq!(
            variances,
            second.tasks.iter().map(|t| t.variance).collect::<Vec<_>>()
        );
    }
}
