//! User Store
//!
//! Contract for the external keyed store that owns user records, plus an
//! in-process implementation used by the server binary and tests.

use crate::error::AuthError;
use crate::models::{normalize_email, User};

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Unique field a user can be looked up by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserLookup<'a> {
    Id(Uuid),
    Email(&'a str),
    Username(&'a str),
}

/// Persistence of user records
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Find a user by a unique field
    async fn find(&self, lookup: UserLookup<'_>) -> Result<Option<User>, AuthError>;

    /// Insert a new user; `Conflict` when the email or username is taken
    async fn create(&self, user: User) -> Result<User, AuthError>;

    /// Replace an existing user record
    async fn save(&self, user: User) -> Result<User, AuthError>;

    async fn close(&self) -> Result<(), AuthError> {
        Ok(())
    }
}

/// Users kept in process memory
///
/// Emails and usernames are unique case-insensitively.
#[derive(Debug, Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip the active flag of a user
    pub async fn set_active(&self, id: Uuid, active: bool) -> Result<User, AuthError> {
        let mut user = self
            .find(UserLookup::Id(id))
            .await?
            .ok_or(AuthError::UserNotFound)?;
        user.is_active = active;
        self.save(user).await
    }

    fn taken(users: &HashMap<Uuid, User>, candidate: &User) -> Option<&'static str> {
        let email = normalize_email(&candidate.email);
        let username = candidate.username.to_lowercase();

        for existing in users.values().filter(|u| u.id != candidate.id) {
            if normalize_email(&existing.email) == email {
                return Some("email");
            }
            if existing.username.to_lowercase() == username {
                return Some("username");
            }
        }
        None
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find(&self, lookup: UserLookup<'_>) -> Result<Option<User>, AuthError> {
        let users = self.users.read().await;
        let found = match lookup {
            UserLookup::Id(id) => users.get(&id),
            UserLookup::Email(email) => {
                let email = normalize_email(email);
                users.values().find(|u| normalize_email(&u.email) == email)
            }
            UserLookup::Username(username) => users
                .values()
                .find(|u| u.username.eq_ignore_ascii_case(username.trim())),
        };
        Ok(found.cloned())
    }

    async fn create(&self, user: User) -> Result<User, AuthError> {
        let mut users = self.users.write().await;
        if users.contains_key(&user.id) {
            return Err(AuthError::Conflict { field: "id" });
        }
        if let Some(field) = Self::taken(&users, &user) {
            return Err(AuthError::Conflict { field });
        }

        users.insert(user.id, user.clone());
        tracing::debug!(user_id = %user.id, "User record created");
        Ok(user)
    }

    async fn save(&self, mut user: User) -> Result<User, AuthError> {
        let mut users = self.users.write().await;
        if !users.contains_key(&user.id) {
            return Err(AuthError::UserNotFound);
        }
        if let Some(field) = Self::taken(&users, &user) {
            return Err(AuthError::Conflict { field });
        }

        user.updated_at = Utc::now();
        users.insert(user.id, user.clone());
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(email: &str, username: &str) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            email: email.into(),
            username: username.into(),
            password_hash: "c2FsdHNhbHQ=$ZGlnZXN0".into(),
            first_name: String::new(),
            last_name: String::new(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let store = MemoryUserStore::new();
        let alice = store.create(user("alice@example.com", "alice")).await.unwrap();

        let by_id = store.find(UserLookup::Id(alice.id)).await.unwrap();
        let by_email = store
            .find(UserLookup::Email("ALICE@example.com "))
            .await
            .unwrap();
        let by_name = store.find(UserLookup::Username("Alice")).await.unwrap();

        assert_eq!(by_id.as_ref(), Some(&alice));
        assert_eq!(by_email.as_ref(), Some(&alice));
        assert_eq!(by_name.as_ref(), Some(&alice));
        assert!(store
            .find(UserLookup::Email("bob@example.com"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_duplicate_fields_conflict() {
        let store = MemoryUserStore::new();
        store.create(user("alice@example.com", "alice")).await.unwrap();

        assert_eq!(
            store.create(user("Alice@Example.com", "other")).await,
            Err(AuthError::Conflict { field: "email" })
        );
        assert_eq!(
            store.create(user("other@example.com", "ALICE")).await,
            Err(AuthError::Conflict { field: "username" })
        );
    }

    #[tokio::test]
    async fn test_save_requires_existing() {
        let store = MemoryUserStore::new();
        assert_eq!(
            store.save(user("ghost@example.com", "ghost")).await,
            Err(AuthError::UserNotFound)
        );
    }

    #[tokio::test]
    async fn test_set_active() {
        let store = MemoryUserStore::new();
        let alice = store.create(user("alice@example.com", "alice")).await.unwrap();

        let disabled = store.set_active(alice.id, false).await.unwrap();
        assert!(!disabled.is_active);
        assert!(disabled.updated_at >= alice.updated_at);

        let stored = store.find(UserLookup::Id(alice.id)).await.unwrap().unwrap();
        assert!(!stored.is_active);
    }
}
