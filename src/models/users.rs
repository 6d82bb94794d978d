use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::common::deserialize_optional_date;
use crate::gamification::UserProgress;

pub const DEFAULT_BIO: &str = "No bio available";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    pub bio: String,
    pub profile_pic: String,
    pub username: Option<String>,
    pub dob: Option<NaiveDate>,
    #[serde(flatten)]
    pub progress: UserProgress,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[validate(length(max = 100))]
    pub name: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(min = 6, max = 128))]
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    #[validate(length(max = 100))]
    pub name: Option<String>,
    #[validate(length(max = 500))]
    pub bio: Option<String>,
    #[validate(length(min = 1, max = 50))]
    pub username: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_date")]
    pub dob: Option<NaiveDate>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct FocusRequest {
    #[validate(range(min = 0, max = 1440))]
    pub minutes: Option<i64>,
}

/// A user plus the bearer token issued for this session.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    #[serde(flatten)]
    pub user: User,
    pub token: String,
}
