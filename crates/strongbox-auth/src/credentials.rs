use std::time::Duration;

use uuid::Uuid;

use crate::parser::SESSION_COOKIE;

/// Credentials extracted from one request.
///
/// For cookie-based credentials `secret` carries the session token and `name`
/// is the owner of that session, when it still exists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub name: Option<String>,
    pub secret: Option<String>,
    pub cookie_based: bool,
}

impl Credentials {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn password(name: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            secret: Some(secret.into()),
            cookie_based: false,
        }
    }

    pub fn cookie(name: Option<String>, token: Option<String>) -> Self {
        Self {
            name,
            secret: token,
            cookie_based: true,
        }
    }
}

pub fn session_cookie_header(session_id: Uuid, ttl: Duration) -> String {
    format!("{SESSION_COOKIE}={session_id}; Max-Age={}", ttl.as_secs())
}
