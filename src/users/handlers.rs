use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    routing::{get, put},
    Json, Router,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        dto::MessageResponse,
        handlers::is_valid_email,
        password::hash_password,
        AuthUser,
    },
    error::{ApiError, ApiResult},
    state::AppState,
    storage::{ext_from_mime, profile_photo_key},
    users::{
        dto::{
            FollowRequest, ProfilePhotoResponse, UnfollowRequest, UpdatePasswordRequest,
            UpdateProfileRequest,
        },
        repo::{self, User},
    },
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_users))
        .route("/:id", get(user_detail).delete(delete_user))
        .route("/profile/:id", get(user_profile))
        .route("/update/:id", put(update_profile))
        .route("/password", put(update_password))
        .route("/follow", put(follow))
        .route("/unfollow", put(unfollow))
        .route("/block/:id", put(block_user))
        .route("/unblock/:id", put(unblock_user))
        .route(
            "/profile-photo-upload",
            put(profile_photo_upload).layer(DefaultBodyLimit::max(10 * 1024 * 1024)),
        )
}

#[instrument(skip(state))]
pub async fn list_users(
    State(state): State<AppState>,
    AuthUser(_user_id): AuthUser,
) -> ApiResult<Json<Vec<User>>> {
    let users = repo::list_all(&state.db).await?;
    Ok(Json(users))
}

#[instrument(skip(state))]
pub async fn user_detail(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<User>> {
    let user = repo::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(Json(user))
}

#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<User>> {
    let user = repo::delete_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    info!(user_id = %id, "user deleted");
    Ok(Json(user))
}

#[instrument(skip(state))]
pub async fn user_profile(
    State(state): State<AppState>,
    AuthUser(_viewer): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<User>> {
    let user = repo::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(Json(user))
}

/// The path id is validated for shape only; the update always applies to the
/// authenticated user's own record.
#[instrument(skip(state, payload))]
pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(_id): Path<Uuid>,
    Json(mut payload): Json<UpdateProfileRequest>,
) -> ApiResult<Json<User>> {
    if let Some(email) = payload.email.as_mut() {
        *email = email.trim().to_lowercase();
        if !is_valid_email(email) {
            return Err(ApiError::validation("Invalid email"));
        }
    }

    let user = match repo::update_profile(
        &state.db,
        user_id,
        payload.first_name.as_deref(),
        payload.last_name.as_deref(),
        payload.email.as_deref(),
        payload.bio.as_deref(),
    )
    .await
    {
        Ok(Some(u)) => u,
        Ok(None) => return Err(ApiError::not_found("User not found")),
        Err(e) if repo::is_duplicate_email(&e) => {
            return Err(ApiError::conflict("Email already in use"));
        }
        Err(e) => return Err(ApiError::Internal(e.into())),
    };

    info!(user_id = %user.id, "profile updated");
    Ok(Json(user))
}

#[instrument(skip(state, payload))]
pub async fn update_password(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<UpdatePasswordRequest>,
) -> ApiResult<Json<User>> {
    if payload.password.len() < 8 {
        return Err(ApiError::validation("Password too short"));
    }

    let hash = hash_password(&payload.password)?;
    let user = repo::set_password(&state.db, user_id, &hash)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    info!(user_id = %user.id, "password updated");
    Ok(Json(user))
}

#[instrument(skip(state))]
pub async fn follow(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Json(payload): Json<FollowRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let target_id = payload.follow_id;
    if target_id == actor {
        return Err(ApiError::validation("You cannot follow yourself"));
    }

    let target = repo::find_by_id(&state.db, target_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    if target.followers.contains(&actor) {
        return Err(ApiError::conflict(format!(
            "You already followed {} {}",
            target.first_name, target.last_name
        )));
    }

    repo::add_follow(&state.db, actor, target_id).await?;

    info!(%actor, target = %target_id, "follow added");
    Ok(Json(MessageResponse {
        message: format!(
            "You have successfully followed {} {}",
            target.first_name, target.last_name
        ),
    }))
}

#[instrument(skip(state))]
pub async fn unfollow(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Json(payload): Json<UnfollowRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let target_id = payload.unfollow_id;

    let target = repo::find_by_id(&state.db, target_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    if !target.followers.contains(&actor) {
        return Err(ApiError::conflict(format!(
            "You are not following {} {}",
            target.first_name, target.last_name
        )));
    }

    repo::remove_follow(&state.db, actor, target_id).await?;

    info!(%actor, target = %target_id, "follow removed");
    Ok(Json(MessageResponse {
        message: format!(
            "You have successfully unfollowed {} {}",
            target.first_name, target.last_name
        ),
    }))
}

#[instrument(skip(state))]
pub async fn block_user(
    State(state): State<AppState>,
    AuthUser(_moderator): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<User>> {
    let user = repo::set_blocked(&state.db, id, true)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    info!(user_id = %id, "user blocked");
    Ok(Json(user))
}

#[instrument(skip(state))]
pub async fn unblock_user(
    State(state): State<AppState>,
    AuthUser(_moderator): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<User>> {
    let user = repo::set_blocked(&state.db, id, false)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    info!(user_id = %id, "user unblocked");
    Ok(Json(user))
}

const PHOTO_URL_TTL_SECS: u64 = 600;

#[instrument(skip(state, mp))]
pub async fn profile_photo_upload(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    mut mp: Multipart,
) -> ApiResult<Json<ProfilePhotoResponse>> {
    let previous = repo::find_by_id(&state.db, user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    let mut upload: Option<(bytes::Bytes, String)> = None;

    while let Some(field) = mp
        .next_field()
        .await
        .map_err(|e| ApiError::validation(e.to_string()))?
    {
        if field.name() == Some("image") {
            let content_type = field
                .content_type()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "application/octet-stream".into());
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::validation(e.to_string()))?;
            upload = Some((data, content_type));
        }
    }

    let (data, content_type) =
        upload.ok_or_else(|| ApiError::validation("image field is required"))?;

    let Some(ext) = ext_from_mime(&content_type) else {
        warn!(%content_type, "rejected profile photo upload");
        return Err(ApiError::validation("Unsupported image type"));
    };

    let key = profile_photo_key(user_id, ext);
    state.storage.put_object(&key, data, &content_type).await?;

    let user = repo::set_profile_photo(&state.db, user_id, &key)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    // the replaced object is unreachable once the row points elsewhere
    if let Some(old_key) = previous.profile_photo {
        if let Err(e) = state.storage.delete_object(&old_key).await {
            warn!(error = %e, %old_key, "failed to delete previous profile photo");
        }
    }

    let photo_url = state.storage.presign_get(&key, PHOTO_URL_TTL_SECS).await?;

    info!(user_id = %user.id, %key, "profile photo uploaded");
    Ok(Json(ProfilePhotoResponse { user, photo_url }))
}
