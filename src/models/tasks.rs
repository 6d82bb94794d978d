use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::common::deserialize_optional_bool;

pub const DEFAULT_CATEGORY: &str = "General";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "High",
            Priority::Medium => "Medium",
            Priority::Low => "Low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "High" => Ok(Priority::High),
            "Medium" => Ok(Priority::Medium),
            "Low" => Ok(Priority::Low),
            other => Err(format!("unknown priority '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Recurrence {
    #[default]
    None,
    Daily,
    Weekly,
    Monthly,
}

impl Recurrence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recurrence::None => "none",
            Recurrence::Daily => "daily",
            Recurrence::Weekly => "weekly",
            Recurrence::Monthly => "monthly",
        }
    }

    pub fn is_recurring(&self) -> bool {
        !matches!(self, Recurrence::None)
    }
}

impl FromStr for Recurrence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Recurrence::None),
            "daily" => Ok(Recurrence::Daily),
            "weekly" => Ok(Recurrence::Weekly),
            "monthly" => Ok(Recurrence::Monthly),
            other => Err(format!("unknown recurrence '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProofType {
    Text,
    Image,
    Video,
}

impl ProofType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProofType::Text => "text",
            ProofType::Image => "image",
            ProofType::Video => "video",
        }
    }

    /// Classifies an uploaded file: images by MIME type, everything else as video.
    pub fn for_upload(content_type: Option<&str>) -> Self {
        match content_type {
            Some(mime) if mime.starts_with("image") => ProofType::Image,
            _ => ProofType::Video,
        }
    }
}

impl FromStr for ProofType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(ProofType::Text),
            "image" => Ok(ProofType::Image),
            "video" => Ok(ProofType::Video),
            other => Err(format!("unknown proof type '{}'", other)),
        }
    }
}

/// A task owned by exactly one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,
    pub owner: Uuid,
    pub title: String,
    pub description: String,
    pub category: String,
    pub priority: Priority,
    pub recurrence: Recurrence,
    pub completed: bool,
    pub deleted: bool,
    pub proof: Option<String>,
    pub proof_type: Option<ProofType>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Fields for a task that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub owner: Uuid,
    pub title: String,
    pub description: String,
    pub category: String,
    pub priority: Priority,
    pub recurrence: Recurrence,
}

impl NewTask {
    /// The next instance of a recurring task: same content, fresh state.
    pub fn respawn_of(task: &Task) -> Self {
        NewTask {
            owner: task.owner,
            title: task.title.clone(),
            description: task.description.clone(),
            category: task.category.clone(),
            priority: task.priority,
            recurrence: task.recurrence,
        }
    }

    pub fn into_task(self, id: Uuid, now: DateTime<Utc>) -> Task {
        Task {
            id,
            owner: self.owner,
            title: self.title,
            description: self.description,
            category: self.category,
            priority: self.priority,
            recurrence: self.recurrence,
            completed: false,
            deleted: false,
            proof: None,
            proof_type: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    #[validate(length(max = 200))]
    pub title: Option<String>,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    #[validate(length(max = 100))]
    pub category: Option<String>,
    pub priority: Option<Priority>,
    pub recurrence: Option<Recurrence>,
}

/// Partial update of a task. Absent fields are left untouched.
#[derive(Debug, Default, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskRequest {
    #[validate(length(max = 200))]
    pub title: Option<String>,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    #[validate(length(max = 100))]
    pub category: Option<String>,
    pub priority: Option<Priority>,
    pub recurrence: Option<Recurrence>,
    #[serde(default, deserialize_with = "deserialize_optional_bool")]
    pub completed: Option<bool>,
    pub proof: Option<String>,
    pub proof_type: Option<ProofType>,
}

/// Response for a task update; carries the gamification result when the
/// update completed the task.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdateResponse {
    #[serde(flatten)]
    pub task: Task,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<crate::gamification::UserProgress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rewards: Option<crate::gamification::CompletionOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spawned_task: Option<Task>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeletedTaskResponse {
    pub id: Uuid,
}
