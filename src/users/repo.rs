use anyhow::Context;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

/// One row per account; the store exclusively owns every record.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub profile_photo: Option<String>,
    pub bio: Option<String>,
    pub is_admin: bool,
    pub is_blocked: bool,
    pub is_account_verified: bool,
    pub is_following: bool,
    pub followers: Vec<Uuid>,
    pub following: Vec<Uuid>,
    #[serde(skip_serializing)]
    pub account_verification_token: Option<String>,
    #[serde(skip_serializing)]
    pub account_verification_expires: Option<OffsetDateTime>,
    #[serde(skip_serializing)]
    pub password_reset_token: Option<String>,
    #[serde(skip_serializing)]
    pub password_reset_expires: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

const COLUMNS: &str = "id, first_name, last_name, email, password_hash, profile_photo, bio, \
     is_admin, is_blocked, is_account_verified, is_following, followers, following, \
     account_verification_token, account_verification_expires, \
     password_reset_token, password_reset_expires, created_at";

pub async fn find_by_email(db: &PgPool, email: &str) -> anyhow::Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {COLUMNS} FROM users WHERE email = $1"
    ))
    .bind(email)
    .fetch_optional(db)
    .await?;
    Ok(user)
}

pub async fn find_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(&format!("SELECT {COLUMNS} FROM users WHERE id = $1"))
        .bind(id)
        .fetch_optional(db)
        .await?;
    Ok(user)
}

pub async fn list_all(db: &PgPool) -> anyhow::Result<Vec<User>> {
    let users = sqlx::query_as::<_, User>(&format!(
        "SELECT {COLUMNS} FROM users ORDER BY created_at DESC"
    ))
    .fetch_all(db)
    .await?;
    Ok(users)
}

pub async fn create(
    db: &PgPool,
    first_name: &str,
    last_name: &str,
    email: &str,
    password_hash: &str,
) -> Result<User, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!(
        "INSERT INTO users (first_name, last_name, email, password_hash) \
         VALUES ($1, $2, $3, $4) \
         RETURNING {COLUMNS}"
    ))
    .bind(first_name)
    .bind(last_name)
    .bind(email)
    .bind(password_hash)
    .fetch_one(db)
    .await
}

/// True when the insert failed on the unique email constraint.
pub fn is_duplicate_email(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|d| d.is_unique_violation())
        .unwrap_or(false)
}

pub async fn delete_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(&format!(
        "DELETE FROM users WHERE id = $1 RETURNING {COLUMNS}"
    ))
    .bind(id)
    .fetch_optional(db)
    .await?;
    Ok(user)
}

pub async fn update_profile(
    db: &PgPool,
    id: Uuid,
    first_name: Option<&str>,
    last_name: Option<&str>,
    email: Option<&str>,
    bio: Option<&str>,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!(
        "UPDATE users \
            SET first_name = COALESCE($2, first_name), \
                last_name  = COALESCE($3, last_name), \
                email      = COALESCE($4, email), \
                bio        = COALESCE($5, bio) \
          WHERE id = $1 \
      RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(first_name)
    .bind(last_name)
    .bind(email)
    .bind(bio)
    .fetch_optional(db)
    .await
}

pub async fn set_password(db: &PgPool, id: Uuid, password_hash: &str) -> anyhow::Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(&format!(
        "UPDATE users SET password_hash = $2 WHERE id = $1 RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(password_hash)
    .fetch_optional(db)
    .await?;
    Ok(user)
}

/// Idempotent moderation toggle.
pub async fn set_blocked(db: &PgPool, id: Uuid, blocked: bool) -> anyhow::Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(&format!(
        "UPDATE users SET is_blocked = $2 WHERE id = $1 RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(blocked)
    .fetch_optional(db)
    .await?;
    Ok(user)
}

pub async fn set_profile_photo(db: &PgPool, id: Uuid, key: &str) -> anyhow::Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(&format!(
        "UPDATE users SET profile_photo = $2 WHERE id = $1 RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(key)
    .fetch_optional(db)
    .await?;
    Ok(user)
}

// ---- action tokens ----

pub async fn store_verification_token(
    db: &PgPool,
    id: Uuid,
    token_hash: &str,
    expires: OffsetDateTime,
) -> anyhow::Result<()> {
    sqlx::query(
        "UPDATE users \
            SET account_verification_token = $2, account_verification_expires = $3 \
          WHERE id = $1",
    )
    .bind(id)
    .bind(token_hash)
    .bind(expires)
    .execute(db)
    .await
    .context("store verification token")?;
    Ok(())
}

/// Matches on digest + unexpired timestamp, sets the verified flag and clears
/// both token fields in the same statement. `None` means expired or unknown.
pub async fn consume_verification_token(
    db: &PgPool,
    token_hash: &str,
) -> anyhow::Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(&format!(
        "UPDATE users \
            SET is_account_verified = TRUE, \
                account_verification_token = NULL, \
                account_verification_expires = NULL \
          WHERE account_verification_token = $1 \
            AND account_verification_expires > now() \
      RETURNING {COLUMNS}"
    ))
    .bind(token_hash)
    .fetch_optional(db)
    .await?;
    Ok(user)
}

pub async fn store_reset_token(
    db: &PgPool,
    id: Uuid,
    token_hash: &str,
    expires: OffsetDateTime,
) -> anyhow::Result<()> {
    sqlx::query(
        "UPDATE users \
            SET password_reset_token = $2, password_reset_expires = $3 \
          WHERE id = $1",
    )
    .bind(id)
    .bind(token_hash)
    .bind(expires)
    .execute(db)
    .await
    .context("store reset token")?;
    Ok(())
}

/// Same shape as verification consumption, but swaps in the new hash.
pub async fn consume_reset_token(
    db: &PgPool,
    token_hash: &str,
    new_password_hash: &str,
) -> anyhow::Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(&format!(
        "UPDATE users \
            SET password_hash = $2, \
                password_reset_token = NULL, \
                password_reset_expires = NULL \
          WHERE password_reset_token = $1 \
            AND password_reset_expires > now() \
      RETURNING {COLUMNS}"
    ))
    .bind(token_hash)
    .bind(new_password_hash)
    .fetch_optional(db)
    .await?;
    Ok(user)
}

// ---- relationship mutations ----

/// Appends both sides of the relationship in one transaction. The array
/// guards keep a user from appearing twice even under concurrent requests.
pub async fn add_follow(db: &PgPool, actor: Uuid, target: Uuid) -> anyhow::Result<()> {
    let mut tx = db.begin().await.context("begin follow tx")?;

    sqlx::query(
        "UPDATE users \
            SET followers = array_append(followers, $2), is_following = TRUE \
          WHERE id = $1 AND NOT ($2 = ANY(followers))",
    )
    .bind(target)
    .bind(actor)
    .execute(&mut *tx)
    .await
    .context("append follower")?;

    sqlx::query(
        "UPDATE users \
            SET following = array_append(following, $2) \
          WHERE id = $1 AND NOT ($2 = ANY(following))",
    )
    .bind(actor)
    .bind(target)
    .execute(&mut *tx)
    .await
    .context("append following")?;

    tx.commit().await.context("commit follow tx")?;
    Ok(())
}

pub async fn remove_follow(db: &PgPool, actor: Uuid, target: Uuid) -> anyhow::Result<()> {
    let mut tx = db.begin().await.context("begin unfollow tx")?;

    sqlx::query(
        "UPDATE users \
            SET followers = array_remove(followers, $2), is_following = FALSE \
          WHERE id = $1",
    )
    .bind(target)
    .bind(actor)
    .execute(&mut *tx)
    .await
    .context("remove follower")?;

    sqlx::query(
        "UPDATE users SET following = array_remove(following, $2) WHERE id = $1",
    )
    .bind(actor)
    .bind(target)
    .execute(&mut *tx)
    .await
    .context("remove following")?;

    tx.commit().await.context("commit unfollow tx")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> User {
        User {
            id: Uuid::new_v4(),
            first_name: "Grace".into(),
            last_name: "Hopper".into(),
            email: "grace@example.com".into(),
            password_hash: "$argon2id$...".into(),
            profile_photo: None,
            bio: Some("compilers".into()),
            is_admin: false,
            is_blocked: false,
            is_account_verified: false,
            is_following: false,
            followers: vec![],
            following: vec![],
            account_verification_token: Some("deadbeef".into()),
            account_verification_expires: Some(OffsetDateTime::now_utc()),
            password_reset_token: None,
            password_reset_expires: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn serialization_never_leaks_secrets() {
        let json = serde_json::to_string(&sample_user()).unwrap();
        assert!(!json.contains("password_hash"));
        assert!(!json.contains("account_verification_token"));
        assert!(!json.contains("password_reset_token"));
        assert!(json.contains("grace@example.com"));
        assert!(json.contains("is_account_verified"));
    }

    #[test]
    fn column_list_matches_struct_order() {
        // FromRow binds by name, but keep the list complete: one entry per field.
        let fields = COLUMNS.split(',').count();
        assert_eq!(fields, 18);
    }
}
