//! Authentication module.

use crate::db::{Database, DownloadLink, Session, User, now_timestamp};
use crate::error::{AppError, Result};
use argon2::{
    Argon2,
    password_hash::{
        PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
        rand_core::{OsRng, RngCore},
    },
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};

const MIN_PASSWORD_LEN: usize = 8;

/// Hash a password using Argon2.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))
}

/// Verify a password against a hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| AppError::Internal(format!("Invalid password hash: {}", e)))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Generate a secure random token.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn validate_password(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::InvalidFormat(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

/// Authentication service.
pub struct AuthService {
    db: Database,
    session_duration_days: u32,
    registration_enabled: bool,
}

impl AuthService {
    /// Create a new auth service.
    pub fn new(db: Database, session_duration_days: u32, registration_enabled: bool) -> Self {
        Self {
            db,
            session_duration_days,
            registration_enabled,
        }
    }

    /// Register a new user.
    pub fn register(
        &self,
        username: &str,
        password: &str,
        display_name: Option<String>,
    ) -> Result<User> {
        if !self.registration_enabled {
            return Err(AppError::Forbidden("Registration is disabled".to_string()));
        }

        let mut user = self.build_user(username, password, "user")?;
        user.display_name = display_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());

        self.db.create_user(&user)?;
        tracing::info!(user_id = %user.id, username = %user.username, "Registered user");
        Ok(user)
    }

    /// Create a new user (admin function).
    pub fn create_user(&self, username: &str, password: &str, role: &str) -> Result<User> {
        let user = self.build_user(username, password, role)?;
        self.db.create_user(&user)?;
        Ok(user)
    }

    fn build_user(&self, username: &str, password: &str, role: &str) -> Result<User> {
        // Validate username
        if username.is_empty() || username.len() > 64 {
            return Err(AppError::InvalidFormat(
                "Username must be 1-64 characters".to_string(),
            ));
        }

        if !username
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.' || c == '@')
        {
            return Err(AppError::InvalidFormat(
                "Username can only contain letters, numbers, _ - . and @".to_string(),
            ));
        }

        validate_password(password)?;

        if role != "admin" && role != "user" {
            return Err(AppError::InvalidFormat(
                "Role must be 'admin' or 'user'".to_string(),
            ));
        }

        Ok(User {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            password_hash: hash_password(password)?,
            display_name: None,
            role: role.to_string(),
            created_at: now_timestamp(),
            last_login: None,
        })
    }

    /// Login and create a session.
    pub fn login(&self, username: &str, password: &str) -> Result<(User, String)> {
        let user = self
            .db
            .get_user_by_username(username)?
            .ok_or_else(|| AppError::Unauthorized("Invalid username or password".to_string()))?;

        if !verify_password(password, &user.password_hash)? {
            return Err(AppError::Unauthorized(
                "Invalid username or password".to_string(),
            ));
        }

        self.db.update_user_last_login(&user.id)?;

        let token = generate_token();
        let expires_at = now_timestamp() + (self.session_duration_days as i64 * 24 * 60 * 60);

        let session = Session {
            token: token.clone(),
            user_id: user.id.clone(),
            expires_at,
        };

        self.db.create_session(&session)?;

        Ok((user, token))
    }

    /// Validate a session token and return the user.
    pub fn validate_token(&self, token: &str) -> Result<Option<User>> {
        let session = match self.db.get_session(token)? {
            Some(s) => s,
            None => return Ok(None),
        };

        // Check expiration
        if session.expires_at < now_timestamp() {
            self.db.delete_session(token)?;
            return Ok(None);
        }

        self.db.get_user_by_id(&session.user_id)
    }

    /// Resolve a bearer token to its user or fail with `Unauthorized`.
    pub fn authenticate(&self, token: &str) -> Result<User> {
        self.validate_token(token)?
            .ok_or_else(|| AppError::Unauthorized("Invalid or expired token".to_string()))
    }

    /// Logout (delete session).
    pub fn logout(&self, token: &str) -> Result<()> {
        self.db.delete_session(token)
    }

    /// Change user password.
    pub fn change_password(&self, username: &str, new_password: &str) -> Result<bool> {
        validate_password(new_password)?;

        let password_hash = hash_password(new_password)?;
        self.db.update_user_password(username, &password_hash)
    }

    /// Delete a user. Returns the `(book_id, storage_key)` pairs whose files
    /// the caller should remove, or `None` if the user does not exist.
    pub fn delete_user(&self, username: &str) -> Result<Option<Vec<(String, String)>>> {
        let Some(user) = self.db.get_user_by_username(username)? else {
            return Ok(None);
        };
        let files = self.db.list_storage_keys(&user.id)?;

        if self.db.delete_user(username)? {
            Ok(Some(files))
        } else {
            Ok(None)
        }
    }

    /// List all users.
    pub fn list_users(&self) -> Result<Vec<User>> {
        self.db.list_users()
    }

    /// Issue a download link valid for `minutes`.
    pub fn issue_download_link(
        &self,
        user_id: &str,
        book_id: &str,
        minutes: u32,
    ) -> Result<DownloadLink> {
        let link = DownloadLink {
            token: generate_token(),
            user_id: user_id.to_string(),
            book_id: book_id.to_string(),
            expires_at: now_timestamp() + i64::from(minutes) * 60,
        };
        self.db.create_download_link(&link)?;
        Ok(link)
    }

    /// Resolve a download token. Unknown and expired tokens are both not found.
    pub fn redeem_download_link(&self, token: &str) -> Result<DownloadLink> {
        match self.db.get_download_link(token)? {
            Some(link) if link.expires_at >= now_timestamp() => Ok(link),
            Some(_) => Err(AppError::NotFound("Download link has expired".to_string())),
            None => Err(AppError::NotFound("Download link not found".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hash_and_verify() {
        let password = "test_password_123";
        let hash = hash_password(password).unwrap();

        assert!(verify_password(password, &hash).unwrap());
        assert!(!verify_password("wrong_password", &hash).unwrap());
    }

    #[test]
    fn test_generate_token() {
        let token1 = generate_token();
        let token2 = generate_token();

        assert_eq!(token1.len(), 43); // Base64 of 32 bytes
        assert_ne!(token1, token2);
    }

    #[test]
    fn test_short_password_rejected() {
        assert!(validate_password("short").is_err());
        assert!(validate_password("long enough").is_ok());
    }
}
