use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::users::repo::User;

/// Mutable profile fields; absent fields are left untouched.
#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub bio: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePasswordRequest {
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct FollowRequest {
    pub follow_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct UnfollowRequest {
    pub unfollow_id: Uuid,
}

/// Updated record plus a time-limited URL for the freshly stored photo.
#[derive(Debug, Serialize)]
pub struct ProfilePhotoResponse {
    pub user: User,
    pub photo_url: String,
}
