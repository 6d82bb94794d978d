use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use uuid::Uuid;

use super::{ProgressUpdate, Store};
use crate::errors::{AppError, Result};
use crate::gamification::UserProgress;
use crate::models::{Task, User};

/// Process-local store. Used when no database is configured, and in tests.
///
/// A single lock covers users and tasks, so every multi-record commit is
/// atomic and completions by the same user are serialized.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    tasks: HashMap<Uuid, Task>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| AppError::Internal("memory store lock poisoned".to_string()))
    }
}

impl Inner {
    fn username_taken(&self, username: &str, except: Uuid) -> bool {
        self.users
            .values()
            .any(|u| u.id != except && u.username.as_deref() == Some(username))
    }

    fn user_mut(&mut self, id: Uuid) -> Result<&mut User> {
        self.users
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_user(&self, user: &User) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.users.values().any(|u| u.email == user.email) {
            return Err(AppError::Conflict("User already exists".to_string()));
        }
        if let Some(username) = &user.username {
            if inner.username_taken(username, user.id) {
                return Err(AppError::Conflict("Username already taken".to_string()));
            }
        }
        inner.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.lock()?.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .lock()?
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn update_profile(&self, user: &User) -> Result<()> {
        let mut inner = self.lock()?;
        if let Some(username) = &user.username {
            if inner.username_taken(username, user.id) {
                return Err(AppError::Conflict("Username already taken".to_string()));
            }
        }
        let stored = inner.user_mut(user.id)?;
        stored.name = user.name.clone();
        stored.bio = user.bio.clone();
        stored.profile_pic = user.profile_pic.clone();
        stored.username = user.username.clone();
        stored.dob = user.dob;
        stored.updated_at = user.updated_at;
        Ok(())
    }

    async fn update_progress(&self, user_id: Uuid, update: ProgressUpdate<'_>) -> Result<UserProgress> {
        let mut inner = self.lock()?;
        let progress = &mut inner.user_mut(user_id)?.progress;
        update(progress);
        Ok(progress.clone())
    }

    async fn insert_task(&self, task: &Task) -> Result<()> {
        self.lock()?.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn find_task(&self, id: Uuid) -> Result<Option<Task>> {
        Ok(self.lock()?.tasks.get(&id).cloned())
    }

    async fn save_task(&self, task: &Task) -> Result<()> {
        let mut inner = self.lock()?;
        match inner.tasks.get_mut(&task.id) {
            Some(stored) => {
                *stored = task.clone();
                Ok(())
            }
            None => Err(AppError::NotFound("Todo not found".to_string())),
        }
    }

    async fn list_tasks(&self, owner: Uuid) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .lock()?
            .tasks
            .values()
            .filter(|t| t.owner == owner)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    async fn commit_completion(
        &self,
        task: &Task,
        spawned: Option<&Task>,
        update: ProgressUpdate<'_>,
    ) -> Result<Option<UserProgress>> {
        let mut inner = self.lock()?;
        match inner.tasks.get(&task.id) {
            Some(stored) if stored.completed => return Ok(None),
            Some(_) => {}
            None => return Err(AppError::NotFound("Todo not found".to_string())),
        }
        // Fail before touching anything so the commit stays all-or-nothing.
        inner.user_mut(task.owner)?;

        inner.tasks.insert(task.id, task.clone());
        if let Some(spawned) = spawned {
            inner.tasks.insert(spawned.id, spawned.clone());
        }
        let progress = &mut inner.user_mut(task.owner)?.progress;
        update(progress);
        Ok(Some(progress.clone()))
    }

    async fn commit_deletion(
        &self,
        task: &Task,
        update: ProgressUpdate<'_>,
    ) -> Result<Option<UserProgress>> {
        let mut inner = self.lock()?;
        match inner.tasks.get(&task.id) {
            Some(stored) if stored.deleted => return Ok(None),
            Some(_) => {}
            None => return Err(AppError::NotFound("Todo not found".to_string())),
        }
        inner.user_mut(task.owner)?;

        inner.tasks.insert(task.id, task.clone());
        let progress = &mut inner.user_mut(task.owner)?.progress;
        update(progress);
        Ok(Some(progress.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::utc;
    use crate::models::{NewTask, Priority, Recurrence};
    use chrono::Utc;

    fn user() -> User {
        let now = utc(2024, 3, 6, 12, 0).with_timezone(&Utc);
        User {
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
        }
    }

    fn open_task(owner: Uuid, recurrence: Recurrence) -> Task {
        NewTask {
            owner,
            title: "Stretch".into(),
            description: String::new(),
            category: "Health".into(),
            priority: Priority::High,
            recurrence,
        }
        .into_task(Uuid::new_v4(), utc(2024, 3, 6, 9, 0).with_timezone(&Utc))
    }

    fn completed(task: &Task) -> Task {
        let mut done = task.clone();
        done.completed = true;
        done.completed_at = Some(utc(2024, 3, 6, 12, 0).with_timezone(&Utc));
        done
    }

    async fn seeded(recurrence: Recurrence) -> (MemoryStore, User, Task) {
        let store = MemoryStore::new();
        let user = user();
        store.insert_user(&user).await.unwrap();
        let task = open_task(user.id, recurrence);
        store.insert_task(&task).await.unwrap();
        (store, user, task)
    }

    #[tokio::test]
    async fn second_completion_of_the_same_snapshot_writes_nothing() {
        let (store, user, task) = seeded(Recurrence::Daily).await;
        let done = completed(&task);
        let now = utc(2024, 3, 6, 12, 0);

        let first_spawn = NewTask::respawn_of(&task).into_task(Uuid::new_v4(), now.with_timezone(&Utc));
        let first = store
            .commit_completion(
                &done,
                Some(&first_spawn),
                Box::new(|p: &mut UserProgress| {
                    p.apply_completion(&done, now);
                }),
            )
            .await
            .unwrap()
            .expect("first completion commits");
        assert_eq!(first.xp, 30);

        let mut ran = false;
        let second_spawn = NewTask::respawn_of(&task).into_task(Uuid::new_v4(), now.with_timezone(&Utc));
        let second = store
            .commit_completion(
                &done,
                Some(&second_spawn),
                Box::new(|p: &mut UserProgress| {
                    ran = true;
                    p.apply_completion(&done, now);
                }),
            )
            .await
            .unwrap();
        assert!(second.is_none());
        assert!(!ran);

        let stored = store.find_user(user.id).await.unwrap().unwrap();
        assert_eq!(stored.progress.xp, 30);
        assert_eq!(stored.progress.streak, 1);
        let tasks = store.list_tasks(user.id).await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert!(store.find_task(second_spawn.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn second_deletion_does_not_count_twice() {
        let (store, user, task) = seeded(Recurrence::None).await;
        let mut deleted = task.clone();
        deleted.deleted = true;

        let first = store
            .commit_deletion(&deleted, Box::new(|p: &mut UserProgress| p.apply_deletion()))
            .await
            .unwrap();
        assert_eq!(first.map(|p| p.deleted_tasks_count), Some(1));

        let second = store
            .commit_deletion(&deleted, Box::new(|p: &mut UserProgress| p.apply_deletion()))
            .await
            .unwrap();
        assert!(second.is_none());
        let stored = store.find_user(user.id).await.unwrap().unwrap();
        assert_eq!(stored.progress.deleted_tasks_count, 1);
    }

    #[tokio::test]
    async fn updates_apply_to_the_stored_progress() {
        let (store, user, task) = seeded(Recurrence::None).await;
        let stale = store.find_user(user.id).await.unwrap().unwrap().progress;
        let done = completed(&task);
        let now = utc(2024, 3, 9, 12, 0);

        store
            .commit_completion(
                &done,
                None,
                Box::new(|p: &mut UserProgress| {
                    p.apply_completion(&done, now);
                }),
            )
            .await
            .unwrap();
        let after_focus = store
            .update_progress(user.id, Box::new(|p: &mut UserProgress| p.apply_focus_minutes(25)))
            .await
            .unwrap();

        assert_eq!(stale.xp, 0);
        assert_eq!(after_focus.xp, 30);
        assert_eq!(after_focus.focus_minutes, 25);
        assert_eq!(after_focus.badges().len(), 1);
    }

    #[tokio::test]
    async fn completion_of_a_missing_task_is_not_found() {
        let (store, user, _) = seeded(Recurrence::None).await;
        let ghost = completed(&open_task(user.id, Recurrence::None));
        let err = store
            .commit_completion(&ghost, None, Box::new(|_: &mut UserProgress| {}))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
