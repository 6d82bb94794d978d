//! Password hashing and bearer session tokens.

use std::sync::Arc;
use std::time::{Duration, Instant};

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use dashmap::DashMap;
use uuid::Uuid;

use crate::errors::{AppError, Result};

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
}

/// Returns false for a wrong password; errors only on a malformed stored hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| AppError::Internal(format!("Invalid password hash format: {}", e)))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

#[derive(Debug, Clone, Copy)]
struct Session {
    user_id: Uuid,
    expires_at: Instant,
}

/// Issued tokens, kept in memory until they expire.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<DashMap<String, Session>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            ttl,
        }
    }

    pub fn issue(&self, user_id: Uuid) -> String {
        let token = Uuid::new_v4().simple().to_string();
        self.sessions.insert(
            token.clone(),
            Session {
                user_id,
                expires_at: Instant::now() + self.ttl,
            },
        );
        token
    }

    /// The user behind a token, if the token exists and has not expired.
    pub fn resolve(&self, token: &str) -> Option<Uuid> {
        let now = Instant::now();
        let session = *self.sessions.get(token)?;
        if now < session.expires_at {
            Some(session.user_id)
        } else {
            self.sessions.remove(token);
            None
        }
    }

    pub fn revoke(&self, token: &str) {
        self.sessions.remove(token);
    }

    /// Drops expired sessions. Called periodically from a background task.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let before_count = self.sessions.len();
        self.sessions.retain(|_, session| now < session.expires_at);
        let removed = before_count.saturating_sub(self.sessions.len());

        if removed > 0 {
            tracing::info!("🧹 Cleaned up {} expired sessions", removed);
        }
        removed
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.sessions.len()
    }
}
