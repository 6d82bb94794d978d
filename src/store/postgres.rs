use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{ProgressUpdate, Store};
use crate::errors::{AppError, Result};
use crate::gamification::{Badge, UserProgress};
use crate::models::{Priority, ProofType, Recurrence, Task, User};

const TASK_COLUMNS: &str = "id, owner, title, description, category, priority, recurrence, \
     completed, deleted, proof, proof_type, created_at, updated_at, completed_at";

const USER_COLUMNS: &str = "id, name, email, password_hash, bio, profile_pic, username, dob, \
     streak, last_completed_at, badges, xp, level, focus_minutes, deleted_tasks_count, \
     created_at, updated_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct TaskRow {
    id: Uuid,
    owner: Uuid,
    title: String,
    description: String,
    category: String,
    priority: String,
    recurrence: String,
    completed: bool,
    deleted: bool,
    proof: Option<String>,
    proof_type: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<TaskRow> for Task {
    type Error = AppError;

    fn try_from(row: TaskRow) -> Result<Self> {
        Ok(Task {
            id: row.id,
            owner: row.owner,
            title: row.title,
            description: row.description,
            category: row.category,
            priority: row.priority.parse::<Priority>().map_err(AppError::Internal)?,
            recurrence: row.recurrence.parse::<Recurrence>().map_err(AppError::Internal)?,
            completed: row.completed,
            deleted: row.deleted,
            proof: row.proof,
            proof_type: row
                .proof_type
                .map(|p| p.parse::<ProofType>())
                .transpose()
                .map_err(AppError::Internal)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    name: String,
    email: String,
    password_hash: String,
    bio: String,
    profile_pic: String,
    username: Option<String>,
    dob: Option<NaiveDate>,
    streak: i32,
    last_completed_at: Option<DateTime<Utc>>,
    badges: Vec<String>,
    xp: i32,
    level: i32,
    focus_minutes: i32,
    deleted_tasks_count: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        let badges = row.badges.iter().filter_map(|name| match name.parse::<Badge>() {
            Ok(badge) => Some(badge),
            Err(e) => {
                tracing::warn!("Ignoring stored badge for user {}: {}", row.id, e);
                None
            }
        });
        let progress = UserProgress::restore(
            from_db(row.streak),
            row.last_completed_at,
            badges.collect::<Vec<_>>(),
            from_db(row.xp),
            from_db(row.level),
            from_db(row.focus_minutes),
            from_db(row.deleted_tasks_count),
        );

        User {
            id: row.id,
            name: row.name,
            email: row.email,
            password_hash: row.password_hash,
            bio: row.bio,
            profile_pic: row.profile_pic,
            username: row.username,
            dob: row.dob,
            progress,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn from_db(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn to_db(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

/// Maps unique-constraint violations on the users table to `Conflict`.
fn user_conflict(err: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            let message = match db_err.constraint() {
                Some(c) if c.contains("username") => "Username already taken",
                _ => "User already exists",
            };
            return AppError::Conflict(message.to_string());
        }
    }
    AppError::Persistence(err)
}

/// Reads the user's progress and holds the row lock until the transaction ends,
/// so concurrent progress changes for one user apply one after another.
async fn lock_progress(tx: &mut Transaction<'_, Postgres>, user_id: Uuid) -> Result<UserProgress> {
    let row = sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {} FROM users WHERE id = $1 FOR UPDATE",
        USER_COLUMNS
    ))
    .bind(user_id)
    .fetch_optional(&mut **tx)
    .await?;

    row.map(|row| User::from(row).progress)
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))
}

async fn write_progress(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    progress: &UserProgress,
) -> Result<()> {
    let badges: Vec<String> = progress.badges().iter().map(|b| b.name().to_string()).collect();

    let result = sqlx::query(
        r#"
        UPDATE users
        SET streak = $2, last_completed_at = $3, badges = $4, xp = $5, level = $6,
            focus_minutes = $7, deleted_tasks_count = $8, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(user_id)
    .bind(to_db(progress.streak))
    .bind(progress.last_completed_at)
    .bind(&badges)
    .bind(to_db(progress.xp))
    .bind(to_db(progress.level))
    .bind(to_db(progress.focus_minutes))
    .bind(to_db(progress.deleted_tasks_count))
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("User not found".to_string()));
    }
    Ok(())
}

async fn write_new_task(tx: &mut Transaction<'_, Postgres>, task: &Task) -> Result<()> {
    sqlx::query(&format!(
        "INSERT INTO tasks ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        TASK_COLUMNS
    ))
    .bind(task.id)
    .bind(task.owner)
    .bind(&task.title)
    .bind(&task.description)
    .bind(&task.category)
    .bind(task.priority.as_str())
    .bind(task.recurrence.as_str())
    .bind(task.completed)
    .bind(task.deleted)
    .bind(&task.proof)
    .bind(task.proof_type.map(|p| p.as_str()))
    .bind(task.created_at)
    .bind(task.updated_at)
    .bind(task.completed_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Overwrites a task's mutable fields. `guard` is appended to the WHERE clause.
async fn write_task(
    tx: &mut Transaction<'_, Postgres>,
    task: &Task,
    guard: &str,
) -> Result<u64> {
    let result = sqlx::query(&format!(
        r#"
        UPDATE tasks
        SET title = $2, description = $3, category = $4, priority = $5, recurrence = $6,
            completed = $7, deleted = $8, proof = $9, proof_type = $10,
            updated_at = $11, completed_at = $12
        WHERE id = $1 {}
        "#,
        guard
    ))
    .bind(task.id)
    .bind(&task.title)
    .bind(&task.description)
    .bind(&task.category)
    .bind(task.priority.as_str())
    .bind(task.recurrence.as_str())
    .bind(task.completed)
    .bind(task.deleted)
    .bind(&task.proof)
    .bind(task.proof_type.map(|p| p.as_str()))
    .bind(task.updated_at)
    .bind(task.completed_at)
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected())
}

#[async_trait]
impl Store for PgStore {
    async fn insert_user(&self, user: &User) -> Result<()> {
        let badges: Vec<String> = user
            .progress
            .badges()
            .iter()
            .map(|b| b.name().to_string())
            .collect();

        sqlx::query(&format!(
            "INSERT INTO users ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
            USER_COLUMNS
        ))
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.bio)
        .bind(&user.profile_pic)
        .bind(&user.username)
        .bind(user.dob)
        .bind(to_db(user.progress.streak))
        .bind(user.progress.last_completed_at)
        .bind(&badges)
        .bind(to_db(user.progress.xp))
        .bind(to_db(user.progress.level))
        .bind(to_db(user.progress.focus_minutes))
        .bind(to_db(user.progress.deleted_tasks_count))
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(user_conflict)?;
        Ok(())
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE email = $1",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    async fn update_profile(&self, user: &User) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET name = $2, bio = $3, profile_pic = $4, username = $5, dob = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.bio)
        .bind(&user.profile_pic)
        .bind(&user.username)
        .bind(user.dob)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(user_conflict)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("User not found".to_string()));
        }
        Ok(())
    }

    async fn update_progress(&self, user_id: Uuid, update: ProgressUpdate<'_>) -> Result<UserProgress> {
        let mut tx = self.pool.begin().await?;
        let mut progress = lock_progress(&mut tx, user_id).await?;
        update(&mut progress);
        write_progress(&mut tx, user_id, &progress).await?;
        tx.commit().await?;
        Ok(progress)
    }

    async fn insert_task(&self, task: &Task) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        write_new_task(&mut tx, task).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_task(&self, id: Uuid) -> Result<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {} FROM tasks WHERE id = $1",
            TASK_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Task::try_from).transpose()
    }

    async fn save_task(&self, task: &Task) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let updated = write_task(&mut tx, task, "").await?;
        if updated == 0 {
            return Err(AppError::NotFound("Todo not found".to_string()));
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_tasks(&self, owner: Uuid) -> Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {} FROM tasks WHERE owner = $1 ORDER BY created_at DESC",
            TASK_COLUMNS
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Task::try_from).collect()
    }

    async fn commit_completion(
        &self,
        task: &Task,
        spawned: Option<&Task>,
        update: ProgressUpdate<'_>,
    ) -> Result<Option<UserProgress>> {
        let mut tx = self.pool.begin().await?;

        // Dropping the transaction without commit rolls it back.
        if write_task(&mut tx, task, "AND completed = FALSE").await? == 0 {
            return Ok(None);
        }
        let mut progress = lock_progress(&mut tx, task.owner).await?;
        update(&mut progress);
        write_progress(&mut tx, task.owner, &progress).await?;
        if let Some(spawned) = spawned {
            write_new_task(&mut tx, spawned).await?;
        }

        tx.commit().await?;
        Ok(Some(progress))
    }

    async fn commit_deletion(
        &self,
        task: &Task,
        update: ProgressUpdate<'_>,
    ) -> Result<Option<UserProgress>> {
        let mut tx = self.pool.begin().await?;

        if write_task(&mut tx, task, "AND deleted = FALSE").await? == 0 {
            return Ok(None);
        }
        let mut progress = lock_progress(&mut tx, task.owner).await?;
        update(&mut progress);
        write_progress(&mut tx, task.owner, &progress).await?;

        tx.commit().await?;
        Ok(Some(progress))
    }
}
