use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, RwLock},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use strongbox_common::error::{Result, StrongboxError};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::{
    secret::{generate_salt, hash_secret, verify_secret},
    store::IdentityStore,
    traits::{SessionStore, UserStore},
    types::{Session, User},
};

/// File-backed user and session registry with an in-memory index.
///
/// Mutations are serialized through `write_lock` so that check-then-insert
/// sequences (name uniqueness, session refresh) observe their own writes.
#[derive(Debug, Clone)]
pub struct IdentitySys {
    store: IdentityStore,
    users: Arc<RwLock<HashMap<Uuid, User>>>,
    sessions: Arc<RwLock<HashMap<Uuid, Session>>>,
    write_lock: Arc<Mutex<()>>,
}

impl IdentitySys {
    pub async fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let store = IdentityStore::new(data_dir).await?;

        let mut users = HashMap::new();
        for user in store.list_users().await? {
            users.insert(user.id, user);
        }

        let mut sessions = HashMap::new();
        for session in store.list_sessions().await? {
            sessions.insert(session.id, session);
        }

        Ok(Self {
            store,
            users: Arc::new(RwLock::new(users)),
            sessions: Arc::new(RwLock::new(sessions)),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn user_count(&self) -> Result<usize> {
        Ok(self.users_read()?.len())
    }

    async fn forget_session(&self, id: Uuid) -> Result<()> {
        self.store.delete_session(id).await?;
        self.sessions_write()?.remove(&id);
        Ok(())
    }

    fn users_read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<Uuid, User>>> {
        self.users
            .read()
            .map_err(|_| StrongboxError::InternalError("identity users lock poisoned".to_string()))
    }

    fn users_write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<Uuid, User>>> {
        self.users
            .write()
            .map_err(|_| StrongboxError::InternalError("identity users lock poisoned".to_string()))
    }

    fn sessions_read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<Uuid, Session>>> {
        self.sessions.read().map_err(|_| {
            StrongboxError::InternalError("identity sessions lock poisoned".to_string())
        })
    }

    fn sessions_write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<Uuid, Session>>> {
        self.sessions.write().map_err(|_| {
            StrongboxError::InternalError("identity sessions lock poisoned".to_string())
        })
    }
}

#[async_trait]
impl UserStore for IdentitySys {
    async fn create_user(&self, name: &str, secret: &str) -> Result<User> {
        let name = name.trim().to_lowercase();
        if name.is_empty() || secret.is_empty() {
            return Err(StrongboxError::InvalidArgument(
                "user name and secret are required".to_string(),
            ));
        }

        let _guard = self.write_lock.lock().await;
        {
            let users = self.users_read()?;
            if users.values().any(|user| user.name == name) {
                return Err(StrongboxError::UserAlreadyExists(name));
            }
        }

        let salt = generate_salt();
        let user = User {
            id: Uuid::new_v4(),
            secret_hash: hash_secret(&salt, secret),
            salt,
            name,
            created_at: Utc::now(),
        };

        self.store.save_user(&user).await?;
        self.users_write()?.insert(user.id, user.clone());
        Ok(user)
    }

    async fn user_by_name(&self, name: &str) -> Result<Option<User>> {
        let name = name.trim().to_lowercase();
        Ok(self
            .users_read()?
            .values()
            .find(|user| user.name == name)
            .cloned())
    }

    async fn user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.users_read()?.get(&id).cloned())
    }

    async fn verify_secret(&self, id: Uuid, secret: &str) -> Result<bool> {
        let users = self.users_read()?;
        Ok(users
            .get(&id)
            .is_some_and(|user| verify_secret(&user.salt, secret, &user.secret_hash)))
    }
}

#[async_trait]
impl SessionStore for IdentitySys {
    async fn create_session(&self, user_id: Uuid, ttl: Duration) -> Result<Session> {
        let session = Session {
            id: Uuid::new_v4(),
            user_id,
            expires_at: expiry_after(Utc::now(), ttl)?,
        };

        let _guard = self.write_lock.lock().await;
        self.store.save_session(&session).await?;
        self.sessions_write()?.insert(session.id, session.clone());
        Ok(session)
    }

    async fn lookup_session(&self, id: Uuid) -> Result<Option<Session>> {
        let session = self.sessions_read()?.get(&id).cloned();
        match session {
            Some(session) if session.is_expired_at(Utc::now()) => {
                debug!(session = %id, "dropping expired session on lookup");
                let _guard = self.write_lock.lock().await;
                self.forget_session(id).await?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn session_for_user(&self, user_id: Uuid) -> Result<Option<Session>> {
        let now = Utc::now();
        Ok(self
            .sessions_read()?
            .values()
            .filter(|session| session.user_id == user_id && !session.is_expired_at(now))
            .max_by_key(|session| session.expires_at)
            .cloned())
    }

    async fn resign_session(&self, id: Uuid, ttl: Duration) -> Result<Option<Session>> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();
        let updated = {
            let mut sessions = self.sessions_write()?;
            match sessions.get_mut(&id) {
                Some(session) if !session.is_expired_at(now) => {
                    session.expires_at = expiry_after(now, ttl)?;
                    Some(session.clone())
                }
                _ => None,
            }
        };

        match updated {
            Some(session) => {
                self.store.save_session(&session).await?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    async fn invalidate_session(&self, id: Uuid) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.forget_session(id).await
    }

    async fn purge_expired(&self) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();
        let expired = self
            .sessions_read()?
            .values()
            .filter(|session| session.is_expired_at(now))
            .map(|session| session.id)
            .collect::<Vec<_>>();

        for id in &expired {
            self.forget_session(*id).await?;
        }
        Ok(expired.len())
    }
}

fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>> {
    let ttl = chrono::Duration::from_std(ttl)
        .map_err(|err| StrongboxError::InvalidArgument(format!("session ttl out of range: {err}")))?;
    now.checked_add_signed(ttl)
        .ok_or_else(|| StrongboxError::InvalidArgument("session ttl out of range".to_string()))
}
