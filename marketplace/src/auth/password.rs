//! Password hashing and verification using Argon2

use std::sync::OnceLock;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

use crate::error::AppError;

/// Hash a password with a fresh salt; returns the PHC string.
pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {e}")))
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| AppError::Internal(format!("Invalid password hash format: {e}")))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

fn dummy_hash() -> Option<&'static str> {
    static DUMMY: OnceLock<Option<String>> = OnceLock::new();
    DUMMY
        .get_or_init(|| hash_password("analog-society-unknown-user").ok())
        .as_deref()
}

/// Burns one verification against a throwaway hash. Sign-in calls this for
/// unknown usernames so they take as long as a wrong password.
pub fn verify_against_dummy(password: &str) {
    if let Some(hash) = dummy_hash() {
        let _ = verify_password(password, hash);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify() {
        let hash = hash_password("p4ss").unwrap();

        assert!(hash.starts_with("$argon2"));
        assert_ne!(hash, "p4ss");
        assert!(verify_password("p4ss", &hash).unwrap());
        assert!(!verify_password("pass", &hash).unwrap());
    }

    #[test]
    fn salts_differ() {
        assert_ne!(hash_password("same").unwrap(), hash_password("same").unwrap());
    }

    #[test]
    fn malformed_hash_is_an_error() {
        assert!(verify_password("password", "plaintext").is_err());
    }

    #[test]
    fn dummy_hash_is_built_once() {
        let first = dummy_hash().unwrap();
        assert!(first.starts_with("$argon2"));
        assert!(std::ptr::eq(first, dummy_hash().unwrap()));
        assert!(!verify_password("p4ss", first).unwrap());
        verify_against_dummy("p4ss");
    }
}
