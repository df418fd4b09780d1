//! Password hashing (Argon2id, PHC string format)

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

use crate::error::{AppError, AppResult};

pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(format!("failed to hash password: {}", e)))?;
    Ok(hash.to_string())
}

/// `Unauthorized` when the password does not match the stored hash
pub fn check_password(password: &str, hashed_password: &str) -> AppResult<()> {
    let parsed = PasswordHash::new(hashed_password)
        .map_err(|e| AppError::Internal(format!("stored password hash is malformed: {}", e)))?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| AppError::Unauthorized("incorrect password".to_string()))
}

// Argon2 is CPU-bound; the async wrappers keep it off the executor threads.

pub async fn hash_password_async(password: String) -> AppResult<String> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| AppError::Internal(format!("password hashing task failed: {}", e)))?
}

pub async fn check_password_async(password: String, hashed_password: String) -> AppResult<()> {
    tokio::task::spawn_blocking(move || check_password(&password, &hashed_password))
        .await
        .map_err(|e| AppError::Internal(format!("password check task failed: {}", e)))?
}
