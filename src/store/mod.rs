//! Persistence seam for users, their progress, and tasks.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::Result;
use crate::gamification::UserProgress;
use crate::models::{Task, User};

/// A change to a user's progress, applied to the stored value inside the
/// same unit of work that writes it back.
pub type ProgressUpdate<'a> = Box<dyn FnOnce(&mut UserProgress) + Send + 'a>;

#[async_trait]
pub trait Store: Send + Sync {
    /// Fails with `Conflict` when the email or username is taken.
    async fn insert_user(&self, user: &User) -> Result<()>;

    async fn find_user(&self, id: Uuid) -> Result<Option<User>>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Saves name, bio, picture, username and date of birth. Progress is untouched.
    async fn update_profile(&self, user: &User) -> Result<()>;

    /// Applies `update` to the user's current progress and returns the result.
    async fn update_progress(&self, user_id: Uuid, update: ProgressUpdate<'_>) -> Result<UserProgress>;

    async fn insert_task(&self, task: &Task) -> Result<()>;

    async fn find_task(&self, id: Uuid) -> Result<Option<Task>>;

    /// Overwrites every mutable field of an existing task.
    async fn save_task(&self, task: &Task) -> Result<()>;

    /// All tasks of a user, deleted ones included, newest first.
    async fn list_tasks(&self, owner: Uuid) -> Result<Vec<Task>>;

    /// Commits a completion in one unit: the task (only if it is still open
    /// in storage), `update` applied to the owner's progress as currently
    /// stored, and the respawned task if any.
    ///
    /// Returns `None` and writes nothing when the stored task was already
    /// completed. `update` is not called in that case.
    async fn commit_completion(
        &self,
        task: &Task,
        spawned: Option<&Task>,
        update: ProgressUpdate<'_>,
    ) -> Result<Option<UserProgress>>;

    /// Soft-deletes the task and applies `update` to the owner's progress in
    /// one unit.
    ///
    /// Returns `None` and writes nothing when the task was already deleted.
    async fn commit_deletion(
        &self,
        task: &Task,
        update: ProgressUpdate<'_>,
    ) -> Result<Option<UserProgress>>;
}
