use std::time::Duration;

/// Runtime settings of the protocol engine.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Listen backlog and the number of connections served at once; also
    /// advertised as `Keep-Alive: max=`.
    pub parallel: u32,
    pub read_timeout: Duration,
    pub cookie_ttl: Duration,
    pub server_name: String,
    pub http_version: String,
    pub read_buffer_size: usize,
    pub max_header_size: usize,
    pub max_small_body: usize,
    pub transfer_chunk_size: usize,
    pub close_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
            parallel: 5,
            read_timeout: Duration::from_secs(10),
            cookie_ttl: Duration::from_secs(3600),
            server_name: "Strongbox HTTP Server/1.0".to_string(),
            http_version: "1.1".to_string(),
            read_buffer_size: 4096,
            max_header_size: 16 * 1024,
            max_small_body: 64 * 1024,
            transfer_chunk_size: 64 * 1024,
            close_grace: Duration::from_secs(1),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn keep_alive_header(&self) -> String {
        format!(
            "timeout={}; max={}",
            self.read_timeout.as_secs(),
            self.parallel
        )
    }
}
