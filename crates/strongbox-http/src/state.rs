use std::sync::Arc;

use strongbox_auth::AuthResolver;

use crate::{
    config::ServerConfig,
    path::StorageRoot,
    response::{Response, ResponseBuilder},
    view::ViewRenderer,
};

/// Everything a connection needs besides its own transport.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub root: Arc<StorageRoot>,
    pub auth: AuthResolver,
    pub view: Arc<dyn ViewRenderer>,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        root: StorageRoot,
        auth: AuthResolver,
        view: Arc<dyn ViewRenderer>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            root: Arc::new(root),
            auth,
            view,
        }
    }

    /// Response builder carrying the server identification.
    pub fn respond(&self, status: u16, reason: impl Into<String>) -> ResponseBuilder {
        Response::builder(status, reason)
            .version(self.config.http_version.as_str())
            .header("Server", self.config.server_name.as_str())
    }
}
