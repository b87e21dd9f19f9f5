use std::time::Duration;

use async_trait::async_trait;
use strongbox_common::error::Result;
use uuid::Uuid;

use crate::types::{Session, User};

/// Account persistence as seen by the protocol engine. Names are matched
/// case-insensitively; the storage format of secrets is private to the
/// implementation.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create_user(&self, name: &str, secret: &str) -> Result<User>;

    async fn user_by_name(&self, name: &str) -> Result<Option<User>>;

    async fn user_by_id(&self, id: Uuid) -> Result<Option<User>>;

    async fn verify_secret(&self, id: Uuid, secret: &str) -> Result<bool>;
}

/// Session persistence. Expired sessions are never returned; looking one up
/// removes it.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, user_id: Uuid, ttl: Duration) -> Result<Session>;

    async fn lookup_session(&self, id: Uuid) -> Result<Option<Session>>;

    async fn session_for_user(&self, user_id: Uuid) -> Result<Option<Session>>;

    /// Pushes the expiry of a live session to `now + ttl`.
    async fn resign_session(&self, id: Uuid, ttl: Duration) -> Result<Option<Session>>;

    async fn invalidate_session(&self, id: Uuid) -> Result<()>;

    async fn purge_expired(&self) -> Result<usize>;
}
