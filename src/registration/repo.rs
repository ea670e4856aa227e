use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use sqlx::PgPool;
use thiserror::Error;

use crate::registration::repo_types::UserRecord;
use crate::token::Identity;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("user already exists")]
    AlreadyExists,

    #[error("user store failure: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Narrow persistence interface the registration flow runs against.
///
/// `create` must be atomic per identity: of two concurrent calls for the
/// same identity exactly one returns `Ok`.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn exists(&self, identity: &Identity) -> Result<bool, StoreError>;

    async fn create(&self, identity: &Identity, credential: &str) -> Result<(), StoreError>;

    async fn get(&self, identity: &Identity) -> Result<Option<UserRecord>, StoreError>;

    /// Mark the record active. Activating an active record is a no-op.
    /// Returns `false` if there is no such record.
    async fn set_active(&self, identity: &Identity) -> Result<bool, StoreError>;
}

/// Process-local store keyed by identity.
#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    users: DashMap<String, UserRecord>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop a record. Not part of the registration flow; used to model
    /// account deletion.
    pub fn remove(&self, identity: &Identity) -> Option<UserRecord> {
        self.users.remove(identity.as_str()).map(|(_, user)| user)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn exists(&self, identity: &Identity) -> Result<bool, StoreError> {
        Ok(self.users.contains_key(identity.as_str()))
    }

    async fn create(&self, identity: &Identity, credential: &str) -> Result<(), StoreError> {
        // entry() holds the shard lock, so check-and-insert is atomic
        match self.users.entry(identity.as_str().to_owned()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists),
            Entry::Vacant(slot) => {
                slot.insert(UserRecord::pending(identity.as_str(), credential));
                Ok(())
            }
        }
    }

    async fn get(&self, identity: &Identity) -> Result<Option<UserRecord>, StoreError> {
        Ok(self
            .users
            .get(identity.as_str())
            .map(|entry| entry.value().clone()))
    }

    async fn set_active(&self, identity: &Identity) -> Result<bool, StoreError> {
        match self.users.get_mut(identity.as_str()) {
            Some(mut user) => {
                user.active = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Postgres-backed store, see `migrations/`.
#[derive(Debug, Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn exists(&self, identity: &Identity) -> Result<bool, StoreError> {
        let found = sqlx::query_scalar::<_, bool>(
            r#"SELECT EXISTS (SELECT 1 FROM users WHERE identity = $1)"#,
        )
        .bind(identity.as_str())
        .fetch_one(&self.db)
        .await
        .map_err(anyhow::Error::from)?;
        Ok(found)
    }

    async fn create(&self, identity: &Identity, credential: &str) -> Result<(), StoreError> {
        // The unique index on identity decides concurrent inserts.
        let inserted = sqlx::query_scalar::<_, uuid::Uuid>(
            r#"
            INSERT INTO users (identity, credential, active)
            VALUES ($1, $2, FALSE)
            ON CONFLICT (identity) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(identity.as_str())
        .bind(credential)
        .fetch_optional(&self.db)
        .await
        .map_err(anyhow::Error::from)?;

        match inserted {
            Some(_) => Ok(()),
            None => Err(StoreError::AlreadyExists),
        }
    }

    async fn get(&self, identity: &Identity) -> Result<Option<UserRecord>, StoreError> {
        let user = sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT id, identity, credential, active, created_at
            FROM users
            WHERE identity = $1
            "#,
        )
        .bind(identity.as_str())
        .fetch_optional(&self.db)
        .await
        .map_err(anyhow::Error::from)?;
        Ok(user)
    }

    async fn set_active(&self, identity: &Identity) -> Result<bool, StoreError> {
        let result = sqlx::query(r#"UPDATE users SET active = TRUE WHERE identity = $1"#)
            .bind(identity.as_str())
            .execute(&self.db)
            .await
            .map_err(anyhow::Error::from)?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(s: &str) -> Identity {
        Identity::new(s).expect("identity")
    }

    #[tokio::test]
    async fn create_then_get_is_pending() {
        let store = InMemoryUserStore::new();
        let alice = identity("alice@x.com");
        store.create(&alice, "hash").await.expect("create");

        assert!(store.exists(&alice).await.unwrap());
        let user = store.get(&alice).await.unwrap().expect("record");
        assert_eq!(user.identity, "alice@x.com");
        assert_eq!(user.credential, "hash");
        assert!(!user.active);
    }

    #[tokio::test]
    async fn create_twice_fails_and_keeps_first() {
        let store = InMemoryUserStore::new();
        let alice = identity("alice@x.com");
        store.create(&alice, "first").await.expect("create");

        let err = store.create(&alice, "second").await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists));
        let user = store.get(&alice).await.unwrap().expect("record");
        assert_eq!(user.credential, "first");
    }

    #[tokio::test]
    async fn set_active_is_idempotent() {
        let store = InMemoryUserStore::new();
        let bob = identity("bob@x.com");
        store.create(&bob, "hash").await.expect("create");

        assert!(store.set_active(&bob).await.unwrap());
        assert!(store.set_active(&bob).await.unwrap());
        assert!(store.get(&bob).await.unwrap().expect("record").active);
    }

    #[tokio::test]
    async fn set_active_on_missing_returns_false() {
        let store = InMemoryUserStore::new();
        assert!(!store.set_active(&identity("ghost@x.com")).await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn remove_drops_record() {
        let store = InMemoryUserStore::new();
        let carol = identity("carol@x.com");
        store.create(&carol, "hash").await.expect("create");
        assert_eq!(store.len(), 1);

        assert!(store.remove(&carol).is_some());
        assert!(store.get(&carol).await.unwrap().is_none());
    }
}
