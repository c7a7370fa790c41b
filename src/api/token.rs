use std::time::Duration;

use rand::Rng;

use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::models::Role;

pub const TOKEN_LENGTH: usize = 32;

const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Random a-zA-Z0-9 token of the given length.
pub fn generate_token(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| CHARSET[rng.random_range(0..CHARSET.len())] as char)
        .collect()
}

/// Mint and store a token for a user, returning the token string.
pub async fn create_token(
    repo: &Repository,
    user_id: i64,
    permissions: i64,
    valid_for: Duration,
) -> Result<String> {
    let token = generate_token(TOKEN_LENGTH);
    let expires_at = chrono::Utc::now().timestamp() + valid_for.as_secs() as i64;
    repo.insert_token(user_id, &token, expires_at, permissions).await?;
    Ok(token)
}

/// Map a presented token to a user id, refusing missing, unknown, and
/// expired tokens, and blocked users.
pub async fn resolve_user(repo: &Repository, token: &str, now_ts: i64) -> Result<i64> {
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::Unauthorized(
            "token is required (use X-Api-Token header or Authorization: Bearer)".to_string(),
        ));
    }

    let Some(info) = repo.get_token(token).await? else {
        return Err(AppError::Unauthorized("invalid token".to_string()));
    };

    if info.expires_at <= now_ts {
        return Err(AppError::Unauthorized("token expired".to_string()));
    }

    match repo.get_user_role(info.user_id).await? {
        Some(Role::Blocked) => Err(AppError::Forbidden("user is blocked".to_string())),
        Some(_) => Ok(info.user_id),
        None => Err(AppError::Unauthorized("invalid token".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_use_the_charset() {
        let token = generate_token(TOKEN_LENGTH);
        assert_eq!(token.len(), TOKEN_LENGTH);
        assert!(token.bytes().all(|b| CHARSET.contains(&b)));

        // Two draws colliding would mean the generator is broken.
        assert_ne!(generate_token(TOKEN_LENGTH), generate_token(TOKEN_LENGTH));
    }

    async fn repo_with_user(role: Role) -> (tempfile::TempDir, Repository, i64) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let repo = Repository::new(path.to_str().unwrap()).await.unwrap();
        let uid = repo.add_user("carol", role).await.unwrap();
        (dir, repo, uid)
    }

    #[tokio::test]
    async fn valid_token_resolves_to_its_user() {
        let (_dir, repo, uid) = repo_with_user(Role::User).await;
        repo.insert_token(uid, "good", 2_000, 0).await.unwrap();

        assert_eq!(resolve_user(&repo, "good", 1_000).await.unwrap(), uid);
        assert_eq!(resolve_user(&repo, " good ", 1_000).await.unwrap(), uid);
    }

    #[tokio::test]
    async fn missing_unknown_and_expired_tokens_are_unauthorized() {
        let (_dir, repo, uid) = repo_with_user(Role::User).await;
        repo.insert_token(uid, "stale", 500, 0).await.unwrap();

        assert!(matches!(
            resolve_user(&repo, "", 1_000).await,
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(
            resolve_user(&repo, "nope", 1_000).await,
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(
            resolve_user(&repo, "stale", 1_000).await,
            Err(AppError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn revoked_token_stops_resolving() {
        let (_dir, repo, uid) = repo_with_user(Role::User).await;
        repo.insert_token(uid, "gone", 2_000, 0).await.unwrap();
        repo.revoke_token("gone").await.unwrap();

        assert!(matches!(
            resolve_user(&repo, "gone", 1_000).await,
            Err(AppError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn blocked_user_is_forbidden() {
        let (_dir, repo, uid) = repo_with_user(Role::Blocked).await;
        repo.insert_token(uid, "blocked", 2_000, 0).await.unwrap();

        assert!(matches!(
            resolve_user(&repo, "blocked", 1_000).await,
            Err(AppError::Forbidden(_))
        ));
    }
}
