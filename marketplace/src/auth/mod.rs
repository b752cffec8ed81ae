//! Accounts and sign-in
//!
//! - `register` stores an argon2 hash, never the password itself
//! - `authenticate` answers the same error, after the same argon2 work, for
//!   unknown users and wrong passwords
//! - `sign_out` removes the server-side session

pub mod password;
pub mod session;

use std::time::Duration;

use tracing::{info, warn};

use crate::{
    database::{Database, DatabaseError, now},
    error::AppError,
    models::{User, UserRow},
    validation::NewAccount,
};

pub use session::{AuthContext, SessionStore};

#[derive(Clone)]
pub struct Accounts {
    db: Database,
    sessions: SessionStore,
}

/// A successful sign-in: who signed in and the id to put in the cookie.
#[derive(Debug)]
pub struct SignedInSession {
    pub user: User,
    pub session_id: String,
}

impl Accounts {
    pub fn new(db: Database, session_ttl: Duration) -> Self {
        Self {
            sessions: SessionStore::new(db.clone(), session_ttl),
            db,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub async fn register(&self, account: NewAccount) -> Result<User, AppError> {
        if self.username_taken(&account.username).await? {
            return Err(AppError::DuplicateUsername);
        }
        if self.email_taken(&account.email).await? {
            return Err(AppError::DuplicateEmail);
        }

        let password_hash = password::hash_password(&account.password)?;
        let created_at = now();

        let result = sqlx::query(
            r#"
            INSERT INTO users (username, email, password_hash, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&account.username)
        .bind(&account.email)
        .bind(&password_hash)
        .bind(&created_at)
        .bind(&created_at)
        .execute(self.db.pool())
        .await
        .map_err(DatabaseError::from);

        // Two sign-ups racing past the checks above land on the unique constraints
        let id = match result {
            Ok(done) => done.last_insert_rowid(),
            Err(e) if e.is_unique_violation() => {
                return Err(if self.username_taken(&account.username).await? {
                    AppError::DuplicateUsername
                } else {
                    AppError::DuplicateEmail
                });
            }
            Err(e) => return Err(e.into()),
        };

        info!(user_id = id, username = account.username.as_str(), "User registered");
        self.get_user(id).await
    }

    pub async fn authenticate(&self, username: &str, password: &str) -> Result<SignedInSession, AppError> {
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE username = ?")
            .bind(username.trim())
            .fetch_optional(self.db.pool())
            .await?;

        let Some(row) = row else {
            password::verify_against_dummy(password);
            warn!(username, "Sign-in for unknown user");
            return Err(AppError::InvalidCredentials);
        };

        if !password::verify_password(password, &row.password_hash)? {
            warn!(user_id = row.id, "Sign-in with wrong password");
            return Err(AppError::InvalidCredentials);
        }

        let session_id = self.sessions.create(row.id, &row.username).await?;
        info!(user_id = row.id, "User signed in");

        Ok(SignedInSession {
            user: row.into(),
            session_id,
        })
    }

    pub async fn sign_out(&self, session_id: &str) -> Result<(), AppError> {
        self.sessions.destroy(session_id).await
    }

    pub async fn get_user(&self, id: i64) -> Result<User, AppError> {
        sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?
            .map(User::from)
            .ok_or_else(|| AppError::NotFound(format!("User with id {} not found", id)))
    }

    async fn username_taken(&self, username: &str) -> Result<bool, AppError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE username = ?")
            .bind(username)
            .fetch_one(self.db.pool())
            .await?;
        Ok(count > 0)
    }

    async fn email_taken(&self, email: &str) -> Result<bool, AppError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = ?")
            .bind(email)
            .fetch_one(self.db.pool())
            .await?;
        Ok(count > 0)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Registers `name` with password "p4ss" and email `<name>@x.com`.
    pub async fn user(accounts: &Accounts, name: &str) -> User {
        accounts
            .register(NewAccount {
                username: name.to_string(),
                email: format!("{name}@x.com"),
                password: "p4ss".to_string(),
            })
            .await
            .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::user;
    use super::*;

    async fn accounts() -> Accounts {
        let db = Database::in_memory().await.unwrap();
        Accounts::new(db, Duration::from_secs(3600))
    }

    fn alice() -> NewAccount {
        NewAccount {
            username: "alice".into(),
            email: "a@x.com".into(),
            password: "p4ss".into(),
        }
    }

    #[tokio::test]
    async fn register_stores_a_hash() {
        let accounts = accounts().await;
        let user = accounts.register(alice()).await.unwrap();

        let hash: String = sqlx::query_scalar("SELECT password_hash FROM users WHERE id = ?")
            .bind(user.id)
            .fetch_one(accounts.db.pool())
            .await
            .unwrap();
        assert_ne!(hash, "p4ss");
        assert!(hash.starts_with("$argon2"));
        assert_eq!(user.profile_picture, "https://via.placeholder.com/150");
    }

    #[tokio::test]
    async fn duplicate_username_and_email() {
        let accounts = accounts().await;
        accounts.register(alice()).await.unwrap();

        let err = accounts.register(alice()).await.unwrap_err();
        assert!(matches!(err, AppError::DuplicateUsername));

        let other = NewAccount {
            username: "alicia".into(),
            ..alice()
        };
        let err = accounts.register(other).await.unwrap_err();
        assert!(matches!(err, AppError::DuplicateEmail));
    }

    #[tokio::test]
    async fn authenticate_hides_which_part_was_wrong() {
        let accounts = accounts().await;
        user(&accounts, "alice").await;

        let unknown = accounts.authenticate("nobody", "p4ss").await.unwrap_err();
        let wrong = accounts.authenticate("alice", "nope").await.unwrap_err();
        assert_eq!(unknown.to_string(), wrong.to_string());
        assert!(matches!(wrong, AppError::InvalidCredentials));

        let signed_in = accounts.authenticate("alice", "p4ss").await.unwrap();
        let ctx = accounts
            .sessions()
            .resolve(&signed_in.session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ctx.username, "alice");

        accounts.sign_out(&signed_in.session_id).await.unwrap();
        assert!(accounts.sessions().resolve(&signed_in.session_id).await.unwrap().is_none());
    }
}
