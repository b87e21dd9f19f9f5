pub mod credentials;
pub mod parser;
pub mod resolver;

pub use credentials::{Credentials, session_cookie_header};
pub use resolver::{AuthOutcome, AuthResolver, SessionVerifier, TrustSessionToken};
