//! Progress rules applied when a task is completed: streaks, badges, XP and
//! levels, and respawning of recurring tasks.
//!
//! Everything here is pure. The caller supplies `now`; the offset it carries
//! decides where calendar days begin and what hour it is.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::models::{NewTask, Priority, Task};

/// Completions before this hour earn Early Bird.
pub const EARLY_BIRD_CUTOFF_HOUR: u32 = 8;
pub const STREAK_MASTER_THRESHOLD: u32 = 3;
/// XP needed to clear level `n` is `n * XP_PER_LEVEL`.
pub const XP_PER_LEVEL: u32 = 100;
pub const DEFAULT_XP_GAIN: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Badge {
    #[serde(rename = "Early Bird")]
    EarlyBird,
    #[serde(rename = "Weekend Warrior")]
    WeekendWarrior,
    #[serde(rename = "Streak Master")]
    StreakMaster,
}

impl Badge {
    pub fn name(&self) -> &'static str {
        match self {
            Badge::EarlyBird => "Early Bird",
            Badge::WeekendWarrior => "Weekend Warrior",
            Badge::StreakMaster => "Streak Master",
        }
    }
}

impl fmt::Display for Badge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Badge {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Early Bird" => Ok(Badge::EarlyBird),
            "Weekend Warrior" => Ok(Badge::WeekendWarrior),
            "Streak Master" => Ok(Badge::StreakMaster),
            other => Err(format!("unknown badge '{}'", other)),
        }
    }
}

/// XP granted for completing a task of the given priority.
pub fn xp_for_priority(priority: Option<Priority>) -> u32 {
    match priority {
        Some(Priority::High) => 30,
        Some(Priority::Medium) => 20,
        Some(Priority::Low) => 10,
        None => DEFAULT_XP_GAIN,
    }
}

/// Per-user gamification state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProgress {
    pub streak: u32,
    pub last_completed_at: Option<DateTime<Utc>>,
    badges: Vec<Badge>,
    pub xp: u32,
    pub level: u32,
    pub focus_minutes: u32,
    pub deleted_tasks_count: u32,
}

impl Default for UserProgress {
    fn default() -> Self {
        UserProgress {
            streak: 0,
            last_completed_at: None,
            badges: Vec::new(),
            xp: 0,
            level: 1,
            focus_minutes: 0,
            deleted_tasks_count: 0,
        }
    }
}

/// What a single completion changed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionOutcome {
    pub xp_gained: u32,
    pub levels_gained: u32,
    pub badges_awarded: Vec<Badge>,
    pub streak_changed: bool,
    #[serde(skip)]
    pub respawn: Option<NewTask>,
}

impl UserProgress {
    /// Rebuilds progress from stored values, dropping duplicate badges and
    /// folding any overflowing XP into levels.
    pub fn restore(
        streak: u32,
        last_completed_at: Option<DateTime<Utc>>,
        badges: impl IntoIterator<Item = Badge>,
        xp: u32,
        level: u32,
        focus_minutes: u32,
        deleted_tasks_count: u32,
    ) -> Self {
        let mut progress = UserProgress {
            streak,
            last_completed_at,
            badges: Vec::new(),
            xp,
            level: level.max(1),
            focus_minutes,
            deleted_tasks_count,
        };
        for badge in badges {
            progress.award(badge);
        }
        progress.normalize_xp();
        progress
    }

    pub fn badges(&self) -> &[Badge] {
        &self.badges
    }

    pub fn has_badge(&self, badge: Badge) -> bool {
        self.badges.contains(&badge)
    }

    /// XP required to leave the current level.
    pub fn xp_threshold(&self) -> u32 {
        self.level.max(1) * XP_PER_LEVEL
    }

    pub fn xp_to_next_level(&self) -> u32 {
        self.xp_threshold().saturating_sub(self.xp)
    }

    /// Applies the rules for a task that just went from open to completed.
    ///
    /// Must be called once per false -> true transition; calling it for a
    /// task that was already completed would award XP twice.
    pub fn apply_completion(&mut self, task: &Task, now: DateTime<FixedOffset>) -> CompletionOutcome {
        let streak_changed = self.update_streak(now);

        let mut badges_awarded = Vec::new();
        if now.hour() < EARLY_BIRD_CUTOFF_HOUR && self.award(Badge::EarlyBird) {
            badges_awarded.push(Badge::EarlyBird);
        }
        if matches!(now.weekday(), Weekday::Sat | Weekday::Sun) && self.award(Badge::WeekendWarrior) {
            badges_awarded.push(Badge::WeekendWarrior);
        }
        if self.streak >= STREAK_MASTER_THRESHOLD && self.award(Badge::StreakMaster) {
            badges_awarded.push(Badge::StreakMaster);
        }

        let xp_gained = xp_for_priority(Some(task.priority));
        self.level = self.level.max(1);
        self.xp = self.xp.saturating_add(xp_gained);
        let levels_gained = self.normalize_xp();

        let respawn = task
            .recurrence
            .is_recurring()
            .then(|| NewTask::respawn_of(task));

        CompletionOutcome {
            xp_gained,
            levels_gained,
            badges_awarded,
            streak_changed,
            respawn,
        }
    }

    pub fn apply_focus_minutes(&mut self, minutes: u32) {
        self.focus_minutes = self.focus_minutes.saturating_add(minutes);
    }

    pub fn apply_deletion(&mut self) {
        self.deleted_tasks_count = self.deleted_tasks_count.saturating_add(1);
    }

    fn update_streak(&mut self, now: DateTime<FixedOffset>) -> bool {
        let today = now.date_naive();
        let last_day = self
            .last_completed_at
            .map(|last| last.with_timezone(now.offset()).date_naive());

        match last_day {
            Some(day) if day == today => return false,
            Some(day) if today.pred_opt() == Some(day) => self.streak += 1,
            _ => self.streak = 1,
        }
        self.last_completed_at = Some(now.with_timezone(&Utc));
        true
    }

    /// Returns true if the badge was not held before.
    fn award(&mut self, badge: Badge) -> bool {
        if self.has_badge(badge) {
            return false;
        }
        self.badges.push(badge);
        true
    }

    /// Rolls XP over into levels until `xp < level * XP_PER_LEVEL`.
    fn normalize_xp(&mut self) -> u32 {
        let mut gained = 0;
        while self.xp >= self.xp_threshold() {
            self.xp -= self.xp_threshold();
            self.level += 1;
            gained += 1;
        }
        gained
    }
}
