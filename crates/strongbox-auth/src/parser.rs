use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};
use thiserror::Error;

pub const SESSION_COOKIE: &str = "session-id";

pub type Result<T> = std::result::Result<T, ParseError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub name: String,
    pub secret: String,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unsupported authorization scheme")]
    UnsupportedScheme,
    #[error("invalid base64 credentials")]
    InvalidEncoding,
    #[error("credentials lack a ':' separator")]
    MissingSeparator,
}

/// Decodes `Basic <base64(name:secret)>`. The secret is everything after the
/// first `:`.
pub fn parse_basic_auth(header: &str) -> Result<BasicCredentials> {
    let (scheme, encoded) = header
        .trim()
        .split_once(' ')
        .ok_or(ParseError::UnsupportedScheme)?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return Err(ParseError::UnsupportedScheme);
    }

    let decoded = BASE64_STANDARD
        .decode(encoded.trim())
        .map_err(|_| ParseError::InvalidEncoding)?;
    let decoded = String::from_utf8(decoded).map_err(|_| ParseError::InvalidEncoding)?;
    let (name, secret) = decoded
        .split_once(':')
        .ok_or(ParseError::MissingSeparator)?;

    Ok(BasicCredentials {
        name: name.to_string(),
        secret: secret.to_string(),
    })
}

/// Returns the raw `session-id` value from a `Cookie` header, if any.
pub fn session_cookie(header: &str) -> Option<&str> {
    header
        .split(';')
        .map(str::trim)
        .filter_map(|pair| pair.split_once('='))
        .find(|(name, _)| name.trim() == SESSION_COOKIE)
        .map(|(_, value)| value.trim())
}
