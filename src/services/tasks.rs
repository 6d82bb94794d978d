use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::analytics;
use crate::clock::Clock;
use crate::errors::{AppError, Result};
use crate::gamification::{CompletionOutcome, UserProgress};
use crate::models::{
    AnalyticsResponse, CreateTaskRequest, NewTask, ProofType, Task, UpdateTaskRequest,
    DEFAULT_CATEGORY,
};
use crate::store::Store;
use crate::uploads::{UploadStore, UploadedFile};

/// Result of an update; `completion` is set only when the update moved the
/// task from open to completed.
#[derive(Debug)]
pub struct TaskUpdate {
    pub task: Task,
    pub completion: Option<Completion>,
}

#[derive(Debug)]
pub struct Completion {
    pub progress: UserProgress,
    pub outcome: CompletionOutcome,
    pub spawned: Option<Task>,
}

#[derive(Clone)]
pub struct TaskService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    uploads: UploadStore,
}

impl TaskService {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, uploads: UploadStore) -> Self {
        Self {
            store,
            clock,
            uploads,
        }
    }

    pub async fn create(&self, owner: Uuid, request: CreateTaskRequest) -> Result<Task> {
        request.validate()?;

        let title = request
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::Validation("Please add a title".to_string()))?;

        let new_task = NewTask {
            owner,
            title: title.to_string(),
            description: request.description.unwrap_or_default(),
            category: category_or_default(request.category),
            priority: request.priority.unwrap_or_default(),
            recurrence: request.recurrence.unwrap_or_default(),
        };
        let task = new_task.into_task(Uuid::new_v4(), self.clock.now().with_timezone(&Utc));
        self.store.insert_task(&task).await?;

        info!("Created task {} for user {}", task.id, owner);
        Ok(task)
    }

    /// A task by id, soft-deleted ones included.
    pub async fn get(&self, task_id: Uuid, actor: Uuid) -> Result<Task> {
        self.owned_task(task_id, actor).await
    }

    pub async fn update(
        &self,
        task_id: Uuid,
        actor: Uuid,
        request: UpdateTaskRequest,
        upload: Option<UploadedFile>,
    ) -> Result<TaskUpdate> {
        let mut task = self.owned_task(task_id, actor).await?;
        request.validate()?;

        if let Some(title) = &request.title {
            let title = title.trim();
            if title.is_empty() {
                return Err(AppError::Validation("Please add a title".to_string()));
            }
            task.title = title.to_string();
        }
        if let Some(description) = request.description {
            task.description = description;
        }
        if request.category.is_some() {
            task.category = category_or_default(request.category);
        }
        if let Some(priority) = request.priority {
            task.priority = priority;
        }
        if let Some(recurrence) = request.recurrence {
            task.recurrence = recurrence;
        }

        let stored_proof = match upload {
            Some(file) => {
                let path = self.uploads.store(&file).await?;
                task.proof = Some(path.clone());
                task.proof_type = Some(ProofType::for_upload(file.content_type.as_deref()));
                Some(path)
            }
            None => {
                if let Some(proof) = request.proof {
                    task.proof = Some(proof);
                }
                if let Some(proof_type) = request.proof_type {
                    task.proof_type = Some(proof_type);
                }
                None
            }
        };

        let result = self.save_update(task, request.completed).await;
        if result.is_err() {
            if let Some(path) = stored_proof {
                self.uploads.discard(&path).await;
            }
        }
        result
    }

    /// Persists an edited task. Runs the completion rules when the task moves
    /// from open to completed.
    async fn save_update(&self, mut task: Task, completed: Option<bool>) -> Result<TaskUpdate> {
        let now = self.clock.now();
        task.updated_at = now.with_timezone(&Utc);

        match completed {
            Some(true) if !task.completed => {
                task.completed = true;
                task.completed_at = Some(task.updated_at);
                let spawned = task
                    .recurrence
                    .is_recurring()
                    .then(|| NewTask::respawn_of(&task).into_task(Uuid::new_v4(), task.updated_at));

                let mut outcome = None;
                let progress = self
                    .store
                    .commit_completion(
                        &task,
                        spawned.as_ref(),
                        Box::new(|progress: &mut UserProgress| {
                            outcome = Some(progress.apply_completion(&task, now));
                        }),
                    )
                    .await?;
                let (progress, outcome) = match (progress, outcome) {
                    (Some(progress), Some(outcome)) => (progress, outcome),
                    _ => return Err(AppError::Conflict("Todo was already completed".to_string())),
                };

                info!(
                    "Task {} completed by {}: +{} XP, level {}, streak {}",
                    task.id, task.owner, outcome.xp_gained, progress.level, progress.streak
                );
                if outcome.levels_gained > 0 {
                    info!("⬆️ User {} reached level {}", task.owner, progress.level);
                }
                for badge in &outcome.badges_awarded {
                    info!("🏅 User {} earned badge '{}'", task.owner, badge);
                }
                if let Some(spawned) = &spawned {
                    info!("🔁 Respawned recurring task {} as {}", task.id, spawned.id);
                }

                return Ok(TaskUpdate {
                    task,
                    completion: Some(Completion {
                        progress,
                        outcome,
                        spawned,
                    }),
                });
            }
            Some(false) => {
                task.completed = false;
                task.completed_at = None;
            }
            _ => {}
        }

        self.store.save_task(&task).await?;
        Ok(TaskUpdate {
            task,
            completion: None,
        })
    }

    /// Soft-deletes the task and counts the deletion against its owner.
    /// Deleting an already deleted task changes nothing.
    pub async fn delete(&self, task_id: Uuid, actor: Uuid) -> Result<Uuid> {
        let mut task = self.owned_task(task_id, actor).await?;
        if task.deleted {
            return Ok(task.id);
        }

        task.deleted = true;
        task.updated_at = self.clock.now().with_timezone(&Utc);

        let committed = self
            .store
            .commit_deletion(&task, Box::new(|progress: &mut UserProgress| progress.apply_deletion()))
            .await?;
        if committed.is_some() {
            info!("Soft-deleted task {} of user {}", task.id, task.owner);
        }
        Ok(task.id)
    }

    /// Non-deleted tasks of a user, newest first.
    pub async fn list(&self, owner: Uuid) -> Result<Vec<Task>> {
        let mut tasks = self.store.list_tasks(owner).await?;
        tasks.retain(|t| !t.deleted);
        Ok(tasks)
    }

    /// Completed, non-deleted tasks, most recently completed first.
    pub async fn history(&self, owner: Uuid) -> Result<Vec<Task>> {
        let mut tasks = self.list(owner).await?;
        tasks.retain(|t| t.completed);
        tasks.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        Ok(tasks)
    }

    pub async fn analytics(&self, owner: Uuid) -> Result<AnalyticsResponse> {
        let user = self
            .store
            .find_user(owner)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
        let tasks = self.list(owner).await?;
        Ok(analytics::summarize(&tasks, &user.progress, self.clock.now()))
    }

    async fn owned_task(&self, task_id: Uuid, actor: Uuid) -> Result<Task> {
        let task = self
            .store
            .find_task(task_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Todo not found".to_string()))?;
        if task.owner != actor {
            return Err(AppError::Unauthorized("User not authorized".to_string()));
        }
        Ok(task)
    }
}

fn category_or_default(category: Option<String>) -> String {
    category
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| DEFAULT_CATEGORY.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::utc;
    use crate::gamification::Badge;
    use crate::models::{Priority, Recurrence, User};
    use crate::services::test_support::Harness;
    use chrono::Duration;

    fn create_request(title: &str, priority: Priority, recurrence: Recurrence) -> CreateTaskRequest {
        CreateTaskRequest {
            title: Some(title.to_string()),
            priority: Some(priority),
            recurrence: Some(recurrence),
            ..Default::default()
        }
    }

    fn complete() -> UpdateTaskRequest {
        UpdateTaskRequest {
            completed: Some(true),
            ..Default::default()
        }
    }

    fn reopen() -> UpdateTaskRequest {
        UpdateTaskRequest {
            completed: Some(false),
            ..Default::default()
        }
    }

    async fn progress_of(h: &Harness, user: Uuid) -> UserProgress {
        h.users.me(user).await.unwrap().progress
    }

    #[tokio::test]
    async fn create_applies_defaults_and_requires_title() {
        let h = Harness::new();
        let (user, _) = h.register("Ada").await;

        let task = h
            .tasks
            .create(
                user,
                CreateTaskRequest {
                    title: Some("  Read a chapter ".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(task.title, "Read a chapter");
        assert_eq!(task.category, "General");
        assert_eq!(task.priority, Priority::Medium);
        assert_eq!(task.recurrence, Recurrence::None);
        assert!(!task.completed && !task.deleted);
        assert!(task.completed_at.is_none());

        for title in [None, Some("   ".to_string())] {
            let err = h
                .tasks
                .create(user, CreateTaskRequest { title, ..Default::default() })
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::Validation(_)));
        }
    }

    #[tokio::test]
    async fn update_checks_existence_and_ownership() {
        let h = Harness::new();
        let (owner, _) = h.register("Ada").await;
        let (intruder, _) = h.register("Eve").await;
        let task = h
            .tasks
            .create(owner, create_request("Private", Priority::Low, Recurrence::None))
            .await
            .unwrap();

        let missing = h.tasks.update(Uuid::new_v4(), owner, complete(), None).await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));

        let foreign = h.tasks.update(task.id, intruder, complete(), None).await;
        assert!(matches!(foreign, Err(AppError::Unauthorized(_))));
        let foreign_delete = h.tasks.delete(task.id, intruder).await;
        assert!(matches!(foreign_delete, Err(AppError::Unauthorized(_))));

        assert!(!h.tasks.get(task.id, owner).await.unwrap().completed);
        assert_eq!(progress_of(&h, intruder).await, UserProgress::default());
    }

    #[tokio::test]
    async fn completing_awards_xp_once() {
        let h = Harness::new();
        let (user, _) = h.register("Ada").await;
        let task = h
            .tasks
            .create(user, create_request("Ship it", Priority::High, Recurrence::None))
            .await
            .unwrap();

        let update = h.tasks.update(task.id, user, complete(), None).await.unwrap();
        assert!(update.task.completed);
        assert_eq!(update.task.completed_at, Some(h.clock.now().with_timezone(&Utc)));
        let completion = update.completion.expect("first completion runs the rules");
        assert_eq!(completion.outcome.xp_gained, 30);
        assert_eq!((completion.progress.level, completion.progress.xp), (1, 30));

        // true -> true is a plain write.
        h.clock.advance(Duration::days(1));
        let again = h.tasks.update(task.id, user, complete(), None).await.unwrap();
        assert!(again.completion.is_none());
        assert_eq!(again.task.completed_at, update.task.completed_at);

        let progress = progress_of(&h, user).await;
        assert_eq!((progress.level, progress.xp, progress.streak), (1, 30, 1));
    }

    #[tokio::test]
    async fn reopening_clears_completion_time_without_touching_progress() {
        let h = Harness::new();
        let (user, _) = h.register("Ada").await;
        let task = h
            .tasks
            .create(user, create_request("Toggle", Priority::Low, Recurrence::None))
            .await
            .unwrap();

        h.tasks.update(task.id, user, complete(), None).await.unwrap();
        let reopened = h.tasks.update(task.id, user, reopen(), None).await.unwrap();
        assert!(!reopened.task.completed);
        assert!(reopened.task.completed_at.is_none());
        assert!(reopened.completion.is_none());
        assert_eq!(progress_of(&h, user).await.xp, 10);

        // A fresh false -> true transition is a new completion.
        let recompleted = h.tasks.update(task.id, user, complete(), None).await.unwrap();
        assert!(recompleted.completion.is_some());
        assert_eq!(progress_of(&h, user).await.xp, 20);
    }

    #[tokio::test]
    async fn four_high_completions_level_up() {
        let h = Harness::new();
        let (user, _) = h.register("Ada").await;
        for i in 0..4 {
            let task = h
                .tasks
                .create(user, create_request(&format!("Task {}", i), Priority::High, Recurrence::None))
                .await
                .unwrap();
            h.tasks.update(task.id, user, complete(), None).await.unwrap();
        }
        let progress = progress_of(&h, user).await;
        assert_eq!((progress.level, progress.xp), (2, 20));
    }

    #[tokio::test]
    async fn daily_completions_build_and_break_streaks() {
        let h = Harness::new();
        let (user, _) = h.register("Ada").await;

        for _ in 0..4 {
            let task = h
                .tasks
                .create(user, create_request("Daily", Priority::Medium, Recurrence::None))
                .await
                .unwrap();
            h.tasks.update(task.id, user, complete(), None).await.unwrap();
            h.clock.advance(Duration::days(1));
        }
        let progress = progress_of(&h, user).await;
        assert_eq!(progress.streak, 4);
        assert!(progress.has_badge(Badge::StreakMaster));

        // Clock now sits one day after the last completion; skip one more.
        h.clock.advance(Duration::days(1));
        let task = h
            .tasks
            .create(user, create_request("After gap", Priority::Medium, Recurrence::None))
            .await
            .unwrap();
        h.tasks.update(task.id, user, complete(), None).await.unwrap();
        assert_eq!(progress_of(&h, user).await.streak, 1);
    }

    #[tokio::test]
    async fn early_bird_awarded_once_across_days() {
        let h = Harness::new();
        let (user, _) = h.register("Ada").await;
        h.clock.set(utc(2024, 3, 4, 6, 30));

        let mut awarded = 0;
        for _ in 0..3 {
            let task = h
                .tasks
                .create(user, create_request("Run", Priority::Low, Recurrence::None))
                .await
                .unwrap();
            let update = h.tasks.update(task.id, user, complete(), None).await.unwrap();
            awarded += update
                .completion
                .unwrap()
                .outcome
                .badges_awarded
                .iter()
                .filter(|b| **b == Badge::EarlyBird)
                .count();
            h.clock.advance(Duration::days(1));
        }
        assert_eq!(awarded, 1);
        let badges = progress_of(&h, user).await;
        assert_eq!(
            badges.badges().iter().filter(|b| **b == Badge::EarlyBird).count(),
            1
        );
    }

    #[tokio::test]
    async fn completing_daily_task_spawns_exactly_one_copy() {
        let h = Harness::new();
        let (user, _) = h.register("Ada").await;
        let mut request = create_request("Meditate", Priority::High, Recurrence::Daily);
        request.category = Some("Health".into());
        request.description = Some("10 minutes".into());
        let task = h.tasks.create(user, request).await.unwrap();

        let proof = UpdateTaskRequest {
            completed: Some(true),
            proof: Some("felt calm".into()),
            proof_type: Some(ProofType::Text),
            ..Default::default()
        };
        let update = h.tasks.update(task.id, user, proof, None).await.unwrap();
        let spawned = update.completion.unwrap().spawned.expect("respawned task");

        let tasks = h.tasks.list(user).await.unwrap();
        assert_eq!(tasks.len(), 2);
        let open: Vec<&Task> = tasks.iter().filter(|t| !t.completed).collect();
        assert_eq!(open.len(), 1);
        let copy = open[0];
        assert_eq!(copy.id, spawned.id);
        assert_ne!(copy.id, task.id);
        assert_eq!(copy.title, "Meditate");
        assert_eq!(copy.description, "10 minutes");
        assert_eq!(copy.category, "Health");
        assert_eq!(copy.priority, Priority::High);
        assert_eq!(copy.recurrence, Recurrence::Daily);
        assert!(copy.proof.is_none() && copy.proof_type.is_none());

        let original = h.tasks.get(task.id, user).await.unwrap();
        assert!(original.completed);
        assert_eq!(original.proof.as_deref(), Some("felt calm"));
        assert_eq!(original.proof_type, Some(ProofType::Text));
    }

    #[tokio::test]
    async fn uploaded_proof_is_stored_and_classified() {
        let h = Harness::new();
        let (user, _) = h.register("Ada").await;
        let task = h
            .tasks
            .create(user, create_request("Photo", Priority::Low, Recurrence::None))
            .await
            .unwrap();

        let file = UploadedFile {
            file_name: Some("proof.png".into()),
            content_type: Some("image/png".into()),
            bytes: vec![1, 2, 3],
        };
        let update = h
            .tasks
            .update(task.id, user, UpdateTaskRequest::default(), Some(file))
            .await
            .unwrap();
        let path = update.task.proof.expect("proof path");
        assert!(path.starts_with("uploads/") && path.ends_with(".png"));
        assert_eq!(update.task.proof_type, Some(ProofType::Image));
        assert!(h.upload_dir.path().join(path.trim_start_matches("uploads/")).exists());
    }

    #[tokio::test]
    async fn blank_title_update_is_rejected() {
        let h = Harness::new();
        let (user, _) = h.register("Ada").await;
        let task = h
            .tasks
            .create(user, create_request("Keep", Priority::Low, Recurrence::None))
            .await
            .unwrap();
        let request = UpdateTaskRequest {
            title: Some(" ".into()),
            ..Default::default()
        };
        let err = h.tasks.update(task.id, user, request, None).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(h.tasks.get(task.id, user).await.unwrap().title, "Keep");
    }

    #[tokio::test]
    async fn soft_delete_keeps_record_and_counts_once() {
        let h = Harness::new();
        let (user, _) = h.register("Ada").await;
        let task = h
            .tasks
            .create(user, create_request("Obsolete", Priority::Low, Recurrence::None))
            .await
            .unwrap();

        assert_eq!(h.tasks.delete(task.id, user).await.unwrap(), task.id);
        let stored = h.tasks.get(task.id, user).await.unwrap();
        assert!(stored.deleted);
        assert_eq!(progress_of(&h, user).await.deleted_tasks_count, 1);
        assert!(h.tasks.list(user).await.unwrap().is_empty());

        h.tasks.delete(task.id, user).await.unwrap();
        assert_eq!(progress_of(&h, user).await.deleted_tasks_count, 1);
    }

    #[tokio::test]
    async fn history_lists_completed_newest_first() {
        let h = Harness::new();
        let (user, _) = h.register("Ada").await;
        let mut ids = Vec::new();
        for title in ["first", "second", "open"] {
            let task = h
                .tasks
                .create(user, create_request(title, Priority::Low, Recurrence::None))
                .await
                .unwrap();
            ids.push(task.id);
        }
        h.tasks.update(ids[0], user, complete(), None).await.unwrap();
        h.clock.advance(Duration::hours(1));
        h.tasks.update(ids[1], user, complete(), None).await.unwrap();

        let history = h.tasks.history(user).await.unwrap();
        let titles: Vec<&str> = history.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["second", "first"]);
    }

    #[tokio::test]
    async fn analytics_reflects_progress() {
        let h = Harness::new();
        let (user, _) = h.register("Ada").await;
        let task = h
            .tasks
            .create(user, create_request("Count me", Priority::High, Recurrence::None))
            .await
            .unwrap();
        h.tasks.update(task.id, user, complete(), None).await.unwrap();

        let stats = h.tasks.analytics(user).await.unwrap();
        assert_eq!(stats.totals.created, 1);
        assert_eq!(stats.totals.completed, 1);
        assert_eq!(stats.activity.last().unwrap().tasks, 1);
        assert_eq!(stats.level_progress.xp, 30);
    }

    /// Delegates to a `MemoryStore`, except that someone else completes the
    /// task right before each completion commit lands.
    struct CompletedConcurrently(crate::store::MemoryStore);

    #[async_trait::async_trait]
    impl Store for CompletedConcurrently {
        async fn insert_user(&self, user: &User) -> Result<()> {
            self.0.insert_user(user).await
        }
        async fn find_user(&self, id: Uuid) -> Result<Option<User>> {
            self.0.find_user(id).await
        }
        async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
            self.0.find_user_by_email(email).await
        }
        async fn update_profile(&self, user: &User) -> Result<()> {
            self.0.update_profile(user).await
        }
        async fn update_progress(
            &self,
            user_id: Uuid,
            update: crate::store::ProgressUpdate<'_>,
        ) -> Result<UserProgress> {
            self.0.update_progress(user_id, update).await
        }
        async fn insert_task(&self, task: &Task) -> Result<()> {
            self.0.insert_task(task).await
        }
        async fn find_task(&self, id: Uuid) -> Result<Option<Task>> {
            self.0.find_task(id).await
        }
        async fn save_task(&self, task: &Task) -> Result<()> {
            self.0.save_task(task).await
        }
        async fn list_tasks(&self, owner: Uuid) -> Result<Vec<Task>> {
            self.0.list_tasks(owner).await
        }
        async fn commit_completion(
            &self,
            task: &Task,
            spawned: Option<&Task>,
            update: crate::store::ProgressUpdate<'_>,
        ) -> Result<Option<UserProgress>> {
            self.0
                .commit_completion(task, None, Box::new(|_: &mut UserProgress| {}))
                .await?;
            self.0.commit_completion(task, spawned, update).await
        }
        async fn commit_deletion(
            &self,
            task: &Task,
            update: crate::store::ProgressUpdate<'_>,
        ) -> Result<Option<UserProgress>> {
            self.0.commit_deletion(task, update).await
        }
    }

    #[tokio::test]
    async fn lost_completion_race_is_a_conflict_without_side_effects() {
        let store = Arc::new(CompletedConcurrently(crate::store::MemoryStore::new()));
        let clock = Arc::new(crate::clock::FixedClock::at(2024, 3, 6, 12, 0));
        let dir = tempfile::tempdir().unwrap();
        let tasks = TaskService::new(store.clone(), clock.clone(), UploadStore::new(dir.path()));

        let now = clock.now().with_timezone(&Utc);
        let user = User {
            id: Uuid::new_v4(),
            name: "Ada".into(),
            email: "ada@example.com".into(),
            password_hash: "hash".into(),
            bio: String::new(),
            profile_pic: String::new(),
            username: None,
            dob: None,
            progress: UserProgress::default(),
            created_at: now,
            updated_at: now,
        };
        store.insert_user(&user).await.unwrap();
        let task = tasks
            .create(user.id, create_request("Run", Priority::High, Recurrence::Daily))
            .await
            .unwrap();

        let file = UploadedFile {
            file_name: Some("finish.jpg".into()),
            content_type: Some("image/jpeg".into()),
            bytes: vec![1, 2, 3],
        };
        let err = tasks.update(task.id, user.id, complete(), Some(file)).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(msg) if msg == "Todo was already completed"));

        let stored = store.find_user(user.id).await.unwrap().unwrap();
        assert_eq!(stored.progress.xp, 0);
        assert_eq!(stored.progress.streak, 0);
        assert_eq!(store.list_tasks(user.id).await.unwrap().len(), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
