use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{ApiError, Result};
use crate::storage::{load_collection, save_collection};
use crate::user_models::User;
use crate::validation::ValidationErrors;

const USERS_FILE: &str = "users.json";

const MIN_PASSWORD_CHARS: usize = 6;

/// Accounts and their login sessions.
///
/// Users persist to a JSON file; session tokens are held in memory only and
/// die with the process.
pub struct UserStorage {
    data_dir: PathBuf,
    users: RwLock<Vec<User>>,
    sessions: RwLock<HashMap<String, String>>,
}

impl UserStorage {
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("creating data directory {}", data_dir.display()))?;

        Ok(Self {
            users: RwLock::new(load_collection(&data_dir.join(USERS_FILE))?),
            sessions: RwLock::new(HashMap::new()),
            data_dir,
        })
    }

    pub async fn signup(&self, username: &str, email: &str, password: &str) -> Result<User> {
        let mut users = self.users.write().await;

        let mut errors = ValidationErrors::new();
        if username.trim().is_empty() {
            errors.add_field("username", "The username cannot be empty.");
        } else if users.iter().any(|u| u.username == username) {
            errors.add_field("username", "This username is already taken.");
        }
        if !email.contains('@') {
            errors.add_field("email", "Enter a valid email address.");
        } else if users.iter().any(|u| u.email == email) {
            errors.add_field("email", "This email address is already registered.");
        }
        if password.chars().count() < MIN_PASSWORD_CHARS {
            errors.add_field(
                "password",
                format!("The password must be at least {MIN_PASSWORD_CHARS} characters long."),
            );
        }
        if !errors.is_empty() {
            return Err(errors.into());
        }

        let password_hash =
            bcrypt::hash(password, bcrypt::DEFAULT_COST).context("hashing password")?;
        let user = User::new(username.to_string(), email.to_string(), password_hash);
        users.push(user.clone());
        save_collection(&self.data_dir.join(USERS_FILE), &users)?;
        Ok(user)
    }

    /// Verifies the credentials and opens a session, returning its token.
    pub async fn login(&self, username: &str, password: &str) -> Result<(String, User)> {
        let users = self.users.read().await;
        let user = users
            .iter()
            .find(|u| u.username == username)
            .ok_or(ApiError::Unauthorized("invalid username or password"))?;

        let valid =
            bcrypt::verify(password, &user.password_hash).context("verifying password")?;
        if !valid {
            return Err(ApiError::Unauthorized("invalid username or password"));
        }

        let token = Uuid::new_v4().to_string();
        self.sessions
            .write()
            .await
            .insert(token.clone(), user.id.clone());
        Ok((token, user.clone()))
    }

    pub async fn user_for_token(&self, token: &str) -> Result<User> {
        let sessions = self.sessions.read().await;
        let user_id = sessions
            .get(token)
            .ok_or(ApiError::Unauthorized("invalid or expired session token"))?;

        let users = self.users.read().await;
        users
            .iter()
            .find(|u| u.id == *user_id)
            .cloned()
            .ok_or(ApiError::Unauthorized("invalid or expired session token"))
    }

    pub async fn logout(&self, token: &str) {
        self.sessions.write().await.remove(token);
    }

    /// Removes the account and all its sessions. The caller cascades the
    /// user's tracker data separately.
    pub async fn delete_user(&self, user_id: &str) -> Result<User> {
        let mut users = self.users.write().await;
        let position = users
            .iter()
            .position(|u| u.id == user_id)
            .ok_or(ApiError::NotFound("user"))?;
        let user = users.remove(position);
        save_collection(&self.data_dir.join(USERS_FILE), &users)?;

        self.sessions
            .write()
            .await
            .retain(|_, session_user| session_user.as_str() != user_id);
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> (tempfile::TempDir, UserStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = UserStorage::new(dir.path()).unwrap();
        (dir, storage)
    }

    #[tokio::test]
    async fn signup_login_and_token_lookup_round_trip() {
        let (_dir, storage) = storage();
        let user = storage
            .signup("testuser", "testuser@email.com", "testpass123")
            .await
            .unwrap();

        let (token, logged_in) = storage.login("testuser", "testpass123").await.unwrap();
        assert_eq!(logged_in.id, user.id);

        let resolved = storage.user_for_token(&token).await.unwrap();
        assert_eq!(resolved.id, user.id);

        storage.logout(&token).await;
        assert!(matches!(
            storage.user_for_token(&token).await,
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn wrong_password_is_unauthorized() {
        let (_dir, storage) = storage();
        storage
            .signup("testuser", "testuser@email.com", "testpass123")
            .await
            .unwrap();

        assert!(matches!(
            storage.login("testuser", "wrongpass").await,
            Err(ApiError::Unauthorized(_))
        ));
        assert!(matches!(
            storage.login("nobody", "testpass123").await,
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_username_and_email_are_rejected() {
        let (_dir, storage) = storage();
        storage
            .signup("testuser", "testuser@email.com", "testpass123")
            .await
            .unwrap();

        let err = storage
            .signup("testuser", "other@email.com", "testpass123")
            .await
            .unwrap_err();
        match err {
            ApiError::Validation(errors) => assert!(errors.errors.contains_key("username")),
            other => panic!("expected validation error, got {other:?}"),
        }

        let err = storage
            .signup("other", "testuser@email.com", "testpass123")
            .await
            .unwrap_err();
        match err {
            ApiError::Validation(errors) => assert!(errors.errors.contains_key("email")),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn short_password_is_rejected() {
        let (_dir, storage) = storage();
        let err = storage
            .signup("testuser", "testuser@email.com", "short")
            .await
            .unwrap_err();
        match err {
            ApiError::Validation(errors) => assert!(errors.errors.contains_key("password")),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn deleting_a_user_drops_their_sessions() {
        let (_dir, storage) = storage();
        let user = storage
            .signup("testuser", "testuser@email.com", "testpass123")
            .await
            .unwrap();
        let (token, _) = storage.login("testuser", "testpass123").await.unwrap();

        storage.delete_user(&user.id).await.unwrap();

        assert!(matches!(
            storage.user_for_token(&token).await,
            Err(ApiError::Unauthorized(_))
        ));
        assert!(matches!(
            storage.login("testuser", "testpass123").await,
            Err(ApiError::Unauthorized(_))
        ));
    }
}
