use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::auth::{self, SessionStore};
use crate::clock::Clock;
use crate::errors::{AppError, Result};
use crate::gamification::UserProgress;
use crate::models::{
    AuthResponse, FocusRequest, LoginRequest, RegisterRequest, UpdateProfileRequest, User,
    DEFAULT_BIO,
};
use crate::store::Store;
use crate::uploads::{UploadStore, UploadedFile};

#[derive(Clone)]
pub struct UserService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    sessions: SessionStore,
    uploads: UploadStore,
}

impl UserService {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        sessions: SessionStore,
        uploads: UploadStore,
    ) -> Self {
        Self {
            store,
            clock,
            sessions,
            uploads,
        }
    }

    /// Creates an account. The email is trimmed and lowercased before it is
    /// checked or stored.
    pub async fn register(
        &self,
        mut request: RegisterRequest,
        profile_pic: Option<UploadedFile>,
    ) -> Result<AuthResponse> {
        request.email = request.email.as_deref().map(normalize_email);
        let (name, email, password) = match (
            non_blank(request.name.as_deref()),
            non_blank(request.email.as_deref()),
            request.password.as_deref().filter(|p| !p.is_empty()),
        ) {
            (Some(name), Some(email), Some(password)) => {
                (name.to_string(), email.to_string(), password)
            }
            _ => return Err(AppError::Validation("Please add all fields".to_string())),
        };
        request.validate()?;

        if self.store.find_user_by_email(&email).await?.is_some() {
            return Err(AppError::Conflict("User already exists".to_string()));
        }

        let now = self.clock.now().with_timezone(&Utc);
        let mut user = User {
            id: Uuid::new_v4(),
            name,
            email,
            password_hash: auth::hash_password(password)?,
            bio: DEFAULT_BIO.to_string(),
            profile_pic: String::new(),
            username: None,
            dob: None,
            progress: UserProgress::default(),
            created_at: now,
            updated_at: now,
        };
        if let Some(file) = profile_pic {
            user.profile_pic = self.uploads.store(&file).await?;
        }
        if let Err(e) = self.store.insert_user(&user).await {
            if !user.profile_pic.is_empty() {
                self.uploads.discard(&user.profile_pic).await;
            }
            return Err(e);
        }

        info!("Registered user {}", user.id);
        let token = self.sessions.issue(user.id);
        Ok(AuthResponse { user, token })
    }

    pub async fn login(&self, request: LoginRequest) -> Result<AuthResponse> {
        let email = normalize_email(&request.email);
        let user = match self.store.find_user_by_email(&email).await? {
            Some(user) => user,
            None => return Err(AppError::InvalidCredentials),
        };
        if !auth::verify_password(&request.password, &user.password_hash)? {
            return Err(AppError::InvalidCredentials);
        }

        let token = self.sessions.issue(user.id);
        Ok(AuthResponse { user, token })
    }

    pub fn logout(&self, token: &str) {
        self.sessions.revoke(token);
    }

    pub async fn me(&self, user_id: Uuid) -> Result<User> {
        self.store
            .find_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    /// Name is only replaced by a non-blank value; other fields whenever present.
    pub async fn update_profile(
        &self,
        user_id: Uuid,
        request: UpdateProfileRequest,
        profile_pic: Option<UploadedFile>,
    ) -> Result<User> {
        request.validate()?;
        let mut user = self.me(user_id).await?;

        if let Some(name) = non_blank(request.name.as_deref()) {
            user.name = name.to_string();
        }
        if let Some(bio) = request.bio {
            user.bio = bio;
        }
        if let Some(username) = request.username {
            user.username = Some(username.trim().to_string()).filter(|u| !u.is_empty());
        }
        if let Some(dob) = request.dob {
            user.dob = Some(dob);
        }
        if let Some(file) = profile_pic {
            user.profile_pic = self.uploads.store(&file).await?;
        }
        user.updated_at = self.clock.now().with_timezone(&Utc);

        self.store.update_profile(&user).await?;
        Ok(user)
    }

    pub async fn add_focus_minutes(&self, user_id: Uuid, request: FocusRequest) -> Result<User> {
        let minutes = request.minutes.unwrap_or(0);
        if minutes < 0 {
            return Err(AppError::Validation("Focus minutes cannot be negative".to_string()));
        }
        request.validate()?;

        let minutes = u32::try_from(minutes).unwrap_or(u32::MAX);
        let mut user = self.me(user_id).await?;
        user.progress = self
            .store
            .update_progress(
                user_id,
                Box::new(move |progress: &mut UserProgress| progress.apply_focus_minutes(minutes)),
            )
            .await?;
        Ok(user)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
