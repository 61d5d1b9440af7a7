use anyhow::Context;
use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use sqlx::PgPool;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::{NewUser, ProfileUpdate, User, UserRow};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("email already registered")]
    DuplicateEmail,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Persistence for user records. Implementations own email uniqueness.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    async fn create(&self, new: NewUser) -> Result<User, StoreError>;
    async fn set_active(&self, id: Uuid, active: bool) -> anyhow::Result<Option<User>>;
    async fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> Result<Option<User>, StoreError>;
    async fn update_password(&self, id: Uuid, password_hash: String) -> anyhow::Result<Option<User>>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

const USER_COLUMNS: &str =
    "id, first_name, last_name, email, password_hash, role, active, created_at";

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("find user by email")?;
        row.map(User::try_from).transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find user by id")?;
        row.map(User::try_from).transpose()
    }

    async fn create(&self, new: NewUser) -> Result<User, StoreError> {
        let res = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (id, first_name, last_name, email, password_hash, role, active)
            VALUES ($1, $2, $3, $4, $5, $6, TRUE)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&new.first_name)
        .bind(&new.last_name)
        .bind(&new.email)
        .bind(&new.password_hash)
        .bind(new.role.as_str())
        .fetch_one(&self.db)
        .await;

        match res {
            Ok(row) => Ok(User::try_from(row)?),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::DuplicateEmail)
            }
            Err(e) => Err(anyhow::Error::new(e).context("insert user").into()),
        }
    }

    async fn set_active(&self, id: Uuid, active: bool) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users SET active = $2 WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(active)
        .fetch_optional(&self.db)
        .await
        .context("update user active flag")?;
        row.map(User::try_from).transpose()
    }

    async fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> Result<Option<User>, StoreError> {
        let res = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users SET first_name = $2, last_name = $3, email = $4
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&update.first_name)
        .bind(&update.last_name)
        .bind(&update.email)
        .fetch_optional(&self.db)
        .await;

        match res {
            Ok(row) => Ok(row.map(User::try_from).transpose()?),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::DuplicateEmail)
            }
            Err(e) => Err(anyhow::Error::new(e).context("update user profile").into()),
        }
    }

    async fn update_password(&self, id: Uuid, password_hash: String) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users SET password_hash = $2 WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(&password_hash)
        .fetch_optional(&self.db)
        .await
        .context("update user password")?;
        row.map(User::try_from).transpose()
    }
}

/// In-process store. `ids` is the email index and the only place email
/// uniqueness is decided.
#[derive(Default)]
pub struct MemoryUserStore {
    users: DashMap<Uuid, User>,
    ids: DashMap<String, Uuid>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let Some(id) = self.ids.get(email).map(|e| *e.value()) else {
            return Ok(None);
        };
        self.find_by_id(id).await
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.users.get(&id).map(|u| u.value().clone()))
    }

    async fn create(&self, new: NewUser) -> Result<User, StoreError> {
        // the entry guard holds the shard lock, so concurrent inserts of one email serialize here
        match self.ids.entry(new.email.clone()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateEmail),
            Entry::Vacant(slot) => {
                let user = User {
                    id: Uuid::new_v4(),
                    first_name: new.first_name,
                    last_name: new.last_name,
                    email: new.email,
                    password_hash: new.password_hash,
                    role: new.role,
                    active: true,
                    created_at: OffsetDateTime::now_utc(),
                };
                self.users.insert(user.id, user.clone());
                slot.insert(user.id);
                Ok(user)
            }
        }
    }

    async fn set_active(&self, id: Uuid, active: bool) -> anyhow::Result<Option<User>> {
        Ok(self.users.get_mut(&id).map(|mut u| {
            u.active = active;
            u.value().clone()
        }))
    }

    async fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> Result<Option<User>, StoreError> {
        let Some(old_email) = self.users.get(&id).map(|u| u.email.clone()) else {
            return Ok(None);
        };

        if update.email != old_email {
            match self.ids.entry(update.email.clone()) {
                Entry::Occupied(taken) if *taken.get() != id => return Err(StoreError::DuplicateEmail),
                Entry::Occupied(_) => {}
                Entry::Vacant(slot) => {
                    slot.insert(id);
                }
            }
            // the entry guard is gone; removing from the same map cannot deadlock
            self.ids.remove_if(&old_email, |_, owner| *owner == id);
        }

        Ok(self.users.get_mut(&id).map(|mut u| {
            u.first_name = update.first_name;
            u.last_name = update.last_name;
            u.email = update.email;
            u.value().clone()
        }))
    }

    async fn update_password(&self, id: Uuid, password_hash: String) -> anyhow::Result<Option<User>> {
        Ok(self.users.get_mut(&id).map(|mut u| {
            u.password_hash = password_hash;
            u.value().clone()
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::auth::claims::Role;

    fn profile(first: &str, last: &str, email: &str) -> ProfileUpdate {
        ProfileUpdate {
            first_name: first.into(),
            last_name: last.into(),
            email: email.into(),
        }
    }

    fn new_user(email: &str) -> NewUser {
        NewUser {
            first_name: "Ann".into(),
            last_name: "Lee".into(),
            email: email.into(),
            password_hash: "hash".into(),
            role: Role::User,
        }
    }

    #[tokio::test]
    async fn create_then_find_by_email_and_id() {
        let store = MemoryUserStore::new();
        let user = store.create(new_user("ann@example.com")).await.unwrap();
        assert!(user.active);
        assert_eq!(user.role, Role::User);

        let by_email = store.find_by_email("ann@example.com").await.unwrap().unwrap();
        assert_eq!(by_email.id, user.id);
        let by_id = store.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(by_id.email, "ann@example.com");
        assert!(store.find_by_id(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let store = MemoryUserStore::new();
        store.create(new_user("ann@example.com")).await.unwrap();
        let err = store.create(new_user("ann@example.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEmail));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_yield_exactly_one_user() {
        let store = Arc::new(MemoryUserStore::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.create(new_user("race@example.com")).await
            }));
        }
        let mut ok = 0;
        let mut dup = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => ok += 1,
                Err(StoreError::DuplicateEmail) => dup += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(dup, 15);
    }

    #[tokio::test]
    async fn set_active_updates_flag() {
        let store = MemoryUserStore::new();
        let user = store.create(new_user("ann@example.com")).await.unwrap();
        let updated = store.set_active(user.id, false).await.unwrap().unwrap();
        assert!(!updated.active);
        let reloaded = store.find_by_id(user.id).await.unwrap().unwrap();
        assert!(!reloaded.active);
        assert!(store.set_active(Uuid::new_v4(), false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_profile_moves_the_email_claim() {
        let store = MemoryUserStore::new();
        let ann = store.create(new_user("ann@example.com")).await.unwrap();
        store.create(new_user("bob@example.com")).await.unwrap();

        let taken = store
            .update_profile(ann.id, profile("Ann", "Lee", "bob@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(taken, StoreError::DuplicateEmail));

        let updated = store
            .update_profile(ann.id, profile("Annie", "Lee", "annie@example.com"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.first_name, "Annie");
        assert_eq!(updated.email, "annie@example.com");
        assert!(store.find_by_email("ann@example.com").await.unwrap().is_none());
        assert_eq!(
            store.find_by_email("annie@example.com").await.unwrap().unwrap().id,
            ann.id
        );

        // the released address is free again
        store.create(new_user("ann@example.com")).await.unwrap();
        assert!(store
            .update_profile(Uuid::new_v4(), profile("X", "Y", "x@example.com"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn update_profile_keeping_the_email_is_allowed() {
        let store = MemoryUserStore::new();
        let ann = store.create(new_user("ann@example.com")).await.unwrap();
        let updated = store
            .update_profile(ann.id, profile("Ann", "Smith", "ann@example.com"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.last_name, "Smith");
        assert!(store.find_by_email("ann@example.com").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn update_password_replaces_the_hash() {
        let store = MemoryUserStore::new();
        let ann = store.create(new_user("ann@example.com")).await.unwrap();
        let updated = store
            .update_password(ann.id, "new-hash".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.password_hash, "new-hash");
        assert!(store
            .update_password(Uuid::new_v4(), "x".into())
            .await
            .unwrap()
            .is_none());
    }
}
