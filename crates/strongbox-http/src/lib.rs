pub mod config;
pub mod connection;
pub mod error;
pub mod handlers;
pub mod handshake;
pub mod headers;
pub mod multipart;
pub mod path;
pub mod range;
pub mod request;
pub mod response;
pub mod serialize;
pub mod server;
pub mod state;
pub mod transport;
pub mod view;

#[cfg(test)]
mod testing;

pub use config::ServerConfig;
pub use connection::{Connection, ConnectionState};
pub use error::{HttpError, Result};
pub use path::StorageRoot;
pub use server::Server;
pub use state::AppState;
pub use view::{HtmlView, ViewRenderer};
