//! Per-user task analytics.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, FixedOffset};

use crate::gamification::UserProgress;
use crate::models::{
    AnalyticsResponse, DailyActivity, LevelProgress, NamedCount, Priority, Task, TaskTotals,
};

/// Days covered by the activity series, today included.
pub const ACTIVITY_DAYS: i64 = 7;

/// Summarizes a user's non-deleted tasks. Days are local to `now`'s offset.
pub fn summarize(tasks: &[Task], progress: &UserProgress, now: DateTime<FixedOffset>) -> AnalyticsResponse {
    let live: Vec<&Task> = tasks.iter().filter(|t| !t.deleted).collect();

    let created = live.len() as u32;
    let completed = live.iter().filter(|t| t.completed).count() as u32;

    let today = now.date_naive();
    let activity = (0..ACTIVITY_DAYS)
        .rev()
        .map(|days_ago| {
            let date = today - Duration::days(days_ago);
            let count = live
                .iter()
                .filter_map(|t| t.completed_at)
                .filter(|at| at.with_timezone(now.offset()).date_naive() == date)
                .count();
            DailyActivity {
                date,
                name: date.format("%a").to_string(),
                tasks: count as u32,
            }
        })
        .collect();

    let mut categories: BTreeMap<&str, u32> = BTreeMap::new();
    for task in &live {
        *categories.entry(task.category.as_str()).or_default() += 1;
    }

    let priorities = Priority::ALL
        .iter()
        .map(|priority| NamedCount {
            name: priority.to_string(),
            value: live.iter().filter(|t| t.priority == *priority).count() as u32,
        })
        .collect();

    AnalyticsResponse {
        totals: TaskTotals {
            created,
            completed,
            pending: created - completed,
            deleted: progress.deleted_tasks_count,
            focus_minutes: progress.focus_minutes,
        },
        activity,
        categories: categories
            .into_iter()
            .map(|(name, value)| NamedCount {
                name: name.to_string(),
                value,
            })
            .collect(),
        priorities,
        level_progress: LevelProgress {
            level: progress.level,
            xp: progress.xp,
            xp_for_next_level: progress.xp_threshold(),
            xp_remaining: progress.xp_to_next_level(),
        },
    }
}
