use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use strongbox_common::error::Result;
use strongbox_iam::{SessionStore, User, UserStore};
use tracing::debug;
use uuid::Uuid;

use crate::{
    credentials::Credentials,
    parser::{parse_basic_auth, session_cookie},
};

#[derive(Debug, Clone)]
pub enum AuthOutcome {
    Granted { user: User, session_id: Uuid },
    Denied { status: u16, message: &'static str },
}

impl AuthOutcome {
    fn denied(status: u16, message: &'static str) -> Self {
        Self::Denied { status, message }
    }
}

/// Decides whether a session token presented as a cookie proves the identity
/// of `user`.
#[async_trait]
pub trait SessionVerifier: Send + Sync {
    async fn verify_session(&self, user: &User, token: &str) -> Result<Option<Uuid>>;
}

/// Accepts any well-formed token that resolved to a user during extraction;
/// existence and expiry were already checked by the session store.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrustSessionToken;

#[async_trait]
impl SessionVerifier for TrustSessionToken {
    async fn verify_session(&self, _user: &User, token: &str) -> Result<Option<Uuid>> {
        Ok(Uuid::parse_str(token).ok())
    }
}

#[derive(Clone)]
pub struct AuthResolver {
    users: Arc<dyn UserStore>,
    sessions: Arc<dyn SessionStore>,
    verifier: Arc<dyn SessionVerifier>,
    session_ttl: Duration,
}

impl AuthResolver {
    pub fn new(
        users: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionStore>,
        session_ttl: Duration,
    ) -> Self {
        Self {
            users,
            sessions,
            verifier: Arc::new(TrustSessionToken),
            session_ttl,
        }
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn SessionVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    pub fn users(&self) -> Arc<dyn UserStore> {
        Arc::clone(&self.users)
    }

    /// `Authorization: Basic` wins over a `session-id` cookie.
    pub async fn extract(
        &self,
        authorization: Option<&str>,
        cookie: Option<&str>,
    ) -> Result<Credentials> {
        if let Some(authorization) = authorization {
            return Ok(match parse_basic_auth(authorization) {
                Ok(basic) => Credentials::password(basic.name, basic.secret),
                Err(err) => {
                    debug!(error = %err, "failed to parse authorization header");
                    Credentials::anonymous()
                }
            });
        }

        let Some(token) = cookie.and_then(session_cookie) else {
            return Ok(Credentials::anonymous());
        };
        let Ok(session_id) = Uuid::parse_str(token) else {
            return Ok(Credentials::cookie(None, None));
        };

        let Some(session) = self.sessions.lookup_session(session_id).await? else {
            return Ok(Credentials::cookie(None, Some(session_id.to_string())));
        };
        let name = self
            .users
            .user_by_id(session.user_id)
            .await?
            .map(|user| user.name);
        Ok(Credentials::cookie(name, Some(session_id.to_string())))
    }

    /// Checks `credentials` and, on success, refreshes the session they map to.
    ///
    /// `owner` is the first path segment of the target; it must match the
    /// authenticated name when `check_ownership` is set.
    pub async fn verify(
        &self,
        owner: &str,
        credentials: &Credentials,
        check_ownership: bool,
    ) -> Result<AuthOutcome> {
        let Some(name) = credentials.name.as_deref() else {
            let message = if credentials.cookie_based {
                "Cookie invalid or expired"
            } else {
                "Authorization Required"
            };
            return Ok(AuthOutcome::denied(401, message));
        };

        let Some(user) = self.users.user_by_name(name).await? else {
            return Ok(AuthOutcome::denied(401, "User not exists"));
        };

        if check_ownership && !owner.eq_ignore_ascii_case(&user.name) {
            return Ok(AuthOutcome::denied(403, "Forbidden"));
        }

        let secret = credentials.secret.as_deref().unwrap_or_default();
        let session_id = if credentials.cookie_based {
            match self.verifier.verify_session(&user, secret).await? {
                Some(session_id) => session_id,
                None => return Ok(AuthOutcome::denied(401, "Cookie invalid or expired")),
            }
        } else {
            if !self.users.verify_secret(user.id, secret).await? {
                return Ok(AuthOutcome::denied(401, "Wrong password"));
            }
            match self.sessions.session_for_user(user.id).await? {
                Some(session) => session.id,
                None => self.sessions.create_session(user.id, self.session_ttl).await?.id,
            }
        };

        let session_id = match self.sessions.resign_session(session_id, self.session_ttl).await? {
            Some(session) => session.id,
            None if credentials.cookie_based => {
                return Ok(AuthOutcome::denied(401, "Cookie invalid or expired"));
            }
            None => self.sessions.create_session(user.id, self.session_ttl).await?.id,
        };

        Ok(AuthOutcome::Granted { user, session_id })
    }
}
