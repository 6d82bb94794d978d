use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsResponse {
    pub totals: TaskTotals,
    pub activity: Vec<DailyActivity>,
    pub categories: Vec<NamedCount>,
    pub priorities: Vec<NamedCount>,
    pub level_progress: LevelProgress,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskTotals {
    pub created: u32,
    pub completed: u32,
    pub pending: u32,
    pub deleted: u32,
    pub focus_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyActivity {
    pub date: chrono::NaiveDate,
    /// Short weekday name, e.g. "Mon".
    pub name: String,
    pub tasks: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedCount {
    pub name: String,
    pub value: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelProgress {
    pub level: u32,
    pub xp: u32,
    pub xp_for_next_level: u32,
    pub xp_remaining: u32,
}
