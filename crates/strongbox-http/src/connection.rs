use std::io;

use strongbox_crypto::SessionCipher;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info, trace, warn};

use crate::{
    error::Result,
    handlers,
    request::{Request, find_head_end},
    response::Response,
    serialize,
    state::AppState,
    transport::Transport,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Accepted,
    Reading,
    Dispatching,
    Responding,
    KeepAlive,
    Closing,
    Closed,
}

enum Received {
    Request(Request),
    Timeout,
    Closed,
    Malformed(String),
}

/// One client connection, served strictly one request at a time.
pub struct Connection<S> {
    app: AppState,
    transport: Transport<S>,
    peer: String,
    state: ConnectionState,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(app: AppState, stream: S, peer: impl Into<String>) -> Self {
        let transport = Transport::new(stream).with_read_timeout(app.config.read_timeout);
        Self {
            app,
            transport,
            peer: peer.into(),
            state: ConnectionState::Accepted,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub async fn run(mut self) {
        debug!(peer = %self.peer, "connection accepted");
        loop {
            self.set_state(ConnectionState::Reading);
            match self.cycle().await {
                Ok(true) => self.set_state(ConnectionState::KeepAlive),
                Ok(false) => break,
                Err(err) => {
                    error!(peer = %self.peer, error = %err, "connection failed");
                    break;
                }
            }
        }

        self.set_state(ConnectionState::Closing);
        tokio::time::sleep(self.app.config.close_grace).await;
        if let Err(err) = self.transport.shutdown().await {
            debug!(peer = %self.peer, error = %err, "shutdown failed");
        }
        self.set_state(ConnectionState::Closed);
        debug!(peer = %self.peer, "connection closed");
    }

    /// Serves one exchange. `Ok(true)` keeps the connection open.
    async fn cycle(&mut self) -> Result<bool> {
        let request = match self.receive().await? {
            Received::Request(request) => request,
            Received::Timeout => {
                info!(peer = %self.peer, "read timed out");
                self.send_final(self.app.respond(200, "Timeout Closed").build())
                    .await;
                return Ok(false);
            }
            Received::Closed => {
                debug!(peer = %self.peer, "peer sent nothing");
                self.send_final(self.app.respond(400, "Bad Request").build())
                    .await;
                return Ok(false);
            }
            Received::Malformed(reason) => {
                warn!(peer = %self.peer, reason = %reason, "malformed request");
                self.send_final(self.app.respond(400, "Bad Request").build())
                    .await;
                return Ok(false);
            }
        };
        info!(peer = %self.peer, request = %request.request_line(), "request");

        self.set_state(ConnectionState::Dispatching);
        let outcome = handlers::dispatch(&self.app, &request, &mut self.transport).await?;

        let keep_alive = request.wants_keep_alive() && outcome.response.status < 300;
        let keep_alive_value = keep_alive.then(|| self.app.config.keep_alive_header());
        let response = outcome
            .response
            .with_connection(keep_alive, keep_alive_value);

        self.set_state(ConnectionState::Responding);
        let status = response.status;
        let sent = serialize::send(
            response,
            &mut self.transport,
            self.app.config.transfer_chunk_size,
        )
        .await?;
        self.transport.flush().await?;
        info!(peer = %self.peer, status, bytes = sent, keep_alive, "response");

        if let Some(key) = outcome.session_key {
            self.transport.install_cipher(SessionCipher::new(&key)?);
            info!(peer = %self.peer, "session cipher installed");
        }
        Ok(keep_alive)
    }

    /// Accumulates reads until a full request head has arrived.
    async fn receive(&mut self) -> Result<Received> {
        let read_size = self.app.config.read_buffer_size;
        let max_head = self.app.config.max_header_size;

        let mut buf = Vec::with_capacity(read_size);
        loop {
            let read = match self.transport.read_into(&mut buf, read_size).await {
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::TimedOut => {
                    return Ok(Received::Timeout);
                }
                Err(err) => return Err(err.into()),
            };
            if read == 0 {
                return Ok(if buf.is_empty() {
                    Received::Closed
                } else {
                    Received::Malformed("stream ended inside request head".to_string())
                });
            }

            if let Some(end) = find_head_end(&buf) {
                if end > max_head {
                    return Ok(Received::Malformed("request head too large".to_string()));
                }
                let body = buf[end + 4..].to_vec();
                return Ok(match Request::parse(&buf[..end], body, buf.len()) {
                    Ok(request) => Received::Request(request),
                    Err(err) => Received::Malformed(err.to_string()),
                });
            }
            if buf.len() >= max_head {
                return Ok(Received::Malformed("request head too large".to_string()));
            }
        }
    }

    /// Sends a closing response; the peer may already be gone.
    async fn send_final(&mut self, response: Response) {
        self.set_state(ConnectionState::Responding);
        let status = response.status;
        let response = response.with_connection(false, None);
        let chunk_size = self.app.config.transfer_chunk_size;
        match serialize::send(response, &mut self.transport, chunk_size).await {
            Ok(_) => info!(peer = %self.peer, status, "response"),
            Err(err) => debug!(peer = %self.peer, error = %err, "closing response not delivered"),
        }
    }

    fn set_state(&mut self, next: ConnectionState) {
        trace!(peer = %self.peer, from = ?self.state, to = ?next, "connection state");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};
    use strongbox_auth::AuthResolver;
    use strongbox_crypto::{KeyPair, SessionKey};
    use strongbox_iam::{IdentitySys, UserStore};
    use tempfile::TempDir;
    use tokio::{io::duplex, task::JoinHandle};

    use super::*;
    use crate::{
        config::ServerConfig,
        handshake::KEY_CONTENT_TYPE,
        path::StorageRoot,
        testing::{RawResponse, TestClient},
        view::HtmlView,
    };

    async fn app_with(dir: &TempDir, tweak: impl FnOnce(&mut ServerConfig)) -> AppState {
        let storage = dir.path().join("storage");
        let sys = Arc::new(IdentitySys::new(dir.path().join("identity")).await.unwrap());
        for name in ["client1", "client2"] {
            sys.create_user(name, "123").await.unwrap();
            std::fs::create_dir_all(storage.join(name)).unwrap();
        }

        let mut config = ServerConfig {
            close_grace: Duration::ZERO,
            ..ServerConfig::default()
        };
        tweak(&mut config);
        let auth = AuthResolver::new(sys.clone(), sys, config.cookie_ttl);
        AppState::new(
            config,
            StorageRoot::new(&storage).unwrap(),
            auth,
            Arc::new(HtmlView),
        )
    }

    async fn app(dir: &TempDir) -> AppState {
        app_with(dir, |_| {}).await
    }

    fn connect(app: &AppState) -> (TestClient, JoinHandle<()>) {
        let (server, client) = duplex(1 << 20);
        let handle = tokio::spawn(Connection::new(app.clone(), server, "test").run());
        (TestClient::new(client), handle)
    }

    fn basic(name: &str) -> String {
        format!(
            "Authorization: Basic {}\r\n",
            BASE64_STANDARD.encode(format!("{name}:123"))
        )
    }

    fn cookie_of(response: &RawResponse) -> String {
        let set_cookie = response.header("Set-Cookie").unwrap();
        assert!(set_cookie.ends_with("; Max-Age=3600"));
        set_cookie.split(';').next().unwrap().to_string()
    }

    #[tokio::test]
    async fn login_redirect_and_cookie_reuse() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir).await;

        let (mut client, _) = connect(&app);
        let login = client
            .roundtrip("GET / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n")
            .await;
        assert_eq!(login.status, 200);
        assert_eq!(login.header("Connection"), Some("Keep-Alive"));
        assert_eq!(login.header("Keep-Alive"), Some("timeout=10; max=5"));
        assert_eq!(login.header("Server"), Some("Strongbox HTTP Server/1.0"));
        assert!(login.body_text().contains("<form"));

        let redirect = client
            .roundtrip(&format!(
                "GET /?SUSTech-HTTP=0 HTTP/1.1\r\nConnection: keep-alive\r\n{}\r\n",
                basic("client1")
            ))
            .await;
        assert_eq!(redirect.status_line, "HTTP/1.1 302 Found");
        assert_eq!(redirect.header("Location"), Some("/client1?SUSTech-HTTP=0"));
        assert_eq!(redirect.header("Connection"), Some("Close"));
        assert!(client.closed().await);

        let cookie = cookie_of(&redirect);
        let (mut client, _) = connect(&app);
        let listing = client
            .roundtrip(&format!(
                "GET /client1/?SUSTech-HTTP=1 HTTP/1.1\r\nCookie: theme=dark; {cookie}\r\n\r\n"
            ))
            .await;
        assert_eq!(listing.status, 200);
        assert_eq!(listing.body_text(), "[]");
        assert_eq!(cookie_of(&listing), cookie);
    }

    #[tokio::test]
    async fn reads_need_credentials_but_not_ownership() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir).await;
        std::fs::write(dir.path().join("storage/client1/a.txt"), b"hello").unwrap();

        let (mut client, _) = connect(&app);
        let denied = client.roundtrip("GET /client1/a.txt HTTP/1.1\r\n\r\n").await;
        assert_eq!(denied.status_line, "HTTP/1.1 401 Unauthorized");
        assert_eq!(
            denied.header("WWW-Authenticate"),
            Some("Basic realm=\"Authorization Required\"")
        );

        let (mut client, _) = connect(&app);
        let read = client
            .roundtrip(&format!(
                "GET /client1/a.txt HTTP/1.1\r\n{}\r\n",
                basic("client2")
            ))
            .await;
        assert_eq!(read.status, 200);
        assert_eq!(read.header("Content-Type"), Some("text/plain"));
        assert_eq!(read.body, b"hello");
    }

    #[tokio::test]
    async fn ranges_chunked_and_head_on_one_connection() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir).await;
        std::fs::write(dir.path().join("storage/client1/data.bin"), b"0123456789").unwrap();
        let auth = basic("client1");

        let (mut client, _) = connect(&app);
        let partial = client
            .roundtrip(&format!(
                "GET /client1/data.bin HTTP/1.1\r\nConnection: keep-alive\r\nRange: bytes=-3\r\n{auth}\r\n"
            ))
            .await;
        assert_eq!(partial.status, 206);
        assert_eq!(partial.header("Content-Range"), Some("bytes 7-9/10"));
        assert_eq!(partial.body, b"789");

        let multi = client
            .roundtrip(&format!(
                "GET /client1/data.bin HTTP/1.1\r\nConnection: keep-alive\r\nRange: bytes=0-1,5-6\r\n{auth}\r\n"
            ))
            .await;
        assert_eq!(multi.status, 206);
        assert!(
            multi
                .header("Content-Type")
                .unwrap()
                .starts_with("multipart/byteranges; boundary=STRONGBOX")
        );
        let declared: usize = multi.header("Content-Length").unwrap().parse().unwrap();
        assert_eq!(multi.body.len(), declared);

        let chunked = client
            .roundtrip(&format!(
                "GET /client1/data.bin?chunked=1 HTTP/1.1\r\nConnection: keep-alive\r\n{auth}\r\n"
            ))
            .await;
        assert_eq!(chunked.header("Transfer-Encoding"), Some("chunked"));
        assert_eq!(chunked.chunk_sizes.iter().sum::<usize>(), 10);
        assert_eq!(chunked.body, b"0123456789");

        let head = client
            .roundtrip(&format!(
                "HEAD /client1/data.bin HTTP/1.1\r\nConnection: keep-alive\r\n{auth}\r\n"
            ))
            .await;
        assert_eq!(head.header("Content-Length"), Some("10"));
        assert!(head.body.is_empty());

        let unsatisfiable = client
            .roundtrip(&format!(
                "GET /client1/data.bin HTTP/1.1\r\nConnection: keep-alive\r\nRange: bytes=8-20\r\n{auth}\r\n"
            ))
            .await;
        assert_eq!(unsatisfiable.status_line, "HTTP/1.1 416 Range Not Satisfiable");
        assert_eq!(unsatisfiable.header("Connection"), Some("Close"));
        assert!(client.closed().await);
    }

    #[tokio::test]
    async fn missing_and_escaping_paths() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir).await;
        std::fs::write(dir.path().join("secret.txt"), b"outside").unwrap();
        let auth = basic("client1");

        let (mut client, _) = connect(&app);
        let missing = client
            .roundtrip(&format!("GET /client1/nope.txt HTTP/1.1\r\n{auth}\r\n"))
            .await;
        assert_eq!(missing.status, 404);

        for target in ["/../secret.txt", "/client1/../../secret.txt", "/%2E%2E/secret.txt"] {
            let (mut client, _) = connect(&app);
            let escaped = client
                .roundtrip(&format!("GET {target} HTTP/1.1\r\n{auth}\r\n"))
                .await;
            assert_eq!(escaped.status, 403, "{target}");
            assert!(escaped.body.is_empty());
        }
    }

    #[tokio::test]
    async fn upload_delete_and_ownership() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir).await;
        let boundary = "XyZ";
        let body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\n\r\nfirst\r\n\
             --{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"b.txt\"\r\n\r\nsecond\r\n\
             --{boundary}--\r\n"
        );
        let upload = |auth: &str| {
            format!(
                "POST /upload?path=/client1/ HTTP/1.1\r\nConnection: keep-alive\r\n{auth}Content-Type: multipart/form-data; boundary={boundary}\r\nContent-Length: {}\r\n\r\n{body}",
                body.len()
            )
        };

        let (mut client, _) = connect(&app);
        let uploaded = client.roundtrip(&upload(&basic("client1"))).await;
        assert_eq!(uploaded.status, 200);
        let folder = dir.path().join("storage/client1");
        assert_eq!(std::fs::read(folder.join("a.txt")).unwrap(), b"first");
        assert_eq!(std::fs::read(folder.join("b.txt")).unwrap(), b"second");

        let deleted = client
            .roundtrip(&format!(
                "POST /delete?path=/client1/a.txt HTTP/1.1\r\nConnection: keep-alive\r\n{}\r\n",
                basic("client1")
            ))
            .await;
        assert_eq!(deleted.status, 200);
        assert!(!folder.join("a.txt").exists());

        let no_path = client
            .roundtrip(&format!("POST /upload HTTP/1.1\r\n{}\r\n", basic("client1")))
            .await;
        assert_eq!(no_path.status_line, "HTTP/1.1 405 Invalid Method");

        let (mut client, _) = connect(&app);
        let forbidden = client.roundtrip(&upload(&basic("client2"))).await;
        assert_eq!(forbidden.status_line, "HTTP/1.1 403 Forbidden");
        assert!(!folder.join("a.txt").exists());
    }

    #[tokio::test]
    async fn rename_and_directory_side_operations() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir).await;
        let folder = dir.path().join("storage/client1");
        std::fs::write(folder.join("old.txt"), b"x").unwrap();
        std::fs::write(folder.join("taken.txt"), b"y").unwrap();
        let auth = basic("client1");

        let (mut client, _) = connect(&app);
        let made = client
            .roundtrip(&format!(
                "POST /upload?path=/client1/ HTTP/1.1\r\nConnection: keep-alive\r\nDirectory: docs\r\n{auth}\r\n"
            ))
            .await;
        assert_eq!(made.status, 200);
        assert!(folder.join("docs").is_dir());

        let renamed = client
            .roundtrip(&format!(
                "POST /upload?path=/client1/old.txt HTTP/1.1\r\nConnection: keep-alive\r\nRename: new.txt\r\n{auth}\r\n"
            ))
            .await;
        assert_eq!(renamed.status, 200);
        assert!(folder.join("new.txt").exists());

        let clash = client
            .roundtrip(&format!(
                "POST /upload?path=/client1/new.txt HTTP/1.1\r\nRename: taken.txt\r\n{auth}\r\n"
            ))
            .await;
        assert_eq!(clash.status_line, "HTTP/1.1 400 File already exists");
    }

    #[tokio::test]
    async fn registration_provisions_a_folder() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir).await;

        let (mut client, _) = connect(&app);
        let created = client
            .roundtrip("POST /register?user=Client9&password=pw HTTP/1.1\r\nConnection: keep-alive\r\n\r\n")
            .await;
        assert_eq!(created.status, 200);
        assert!(dir.path().join("storage/client9").is_dir());

        let form = "user=client9&password=other";
        let duplicate = client
            .roundtrip(&format!(
                "POST /register HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{form}",
                form.len()
            ))
            .await;
        assert_eq!(duplicate.status_line, "HTTP/1.1 400 User already exists");
        assert!(app.auth.users().user_by_name("client9").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn encrypted_session_after_handshake() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir).await;
        std::fs::write(dir.path().join("storage/client1/a.txt"), b"classified").unwrap();
        let pair = KeyPair::generate(1024).unwrap();
        let pem = pair.public_key_pem().unwrap();

        let (mut client, _) = connect(&app);
        let offer = client
            .roundtrip(&format!(
                "ENCRYPT / HTTP/1.1\r\nConnection: keep-alive\r\nContent-Length: {}\r\n\r\n{pem}",
                pem.len()
            ))
            .await;
        assert_eq!(offer.status, 200);
        assert_eq!(offer.header("Content-Type"), Some(KEY_CONTENT_TYPE));

        let key = SessionKey::from_bytes(&pair.unwrap_key(&offer.body).unwrap()).unwrap();
        client.install_cipher(&key);

        for _ in 0..2 {
            let read = client
                .roundtrip(&format!(
                    "GET /client1/a.txt HTTP/1.1\r\nConnection: keep-alive\r\n{}\r\n",
                    basic("client1")
                ))
                .await;
            assert_eq!(read.status, 200);
            assert_eq!(read.body, b"classified");
        }

        let again = client
            .roundtrip(&format!(
                "ENCRYPT / HTTP/1.1\r\nContent-Length: {}\r\n\r\n{pem}",
                pem.len()
            ))
            .await;
        assert_eq!(again.status, 400);
    }

    #[tokio::test]
    async fn idle_connection_times_out_with_200() {
        let dir = TempDir::new().unwrap();
        let app = app_with(&dir, |config| {
            config.read_timeout = Duration::from_millis(50)
        })
        .await;

        let (mut client, handle) = connect(&app);
        let timeout = client.response(false).await.unwrap();
        assert_eq!(timeout.status_line, "HTTP/1.1 200 Timeout Closed");
        assert_eq!(timeout.header("Connection"), Some("Close"));
        assert!(client.closed().await);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn stalled_upload_body_ends_the_connection() {
        let dir = TempDir::new().unwrap();
        let app = app_with(&dir, |config| {
            config.read_timeout = Duration::from_millis(100)
        })
        .await;

        let (mut client, handle) = connect(&app);
        client
            .send(
                format!(
                    "POST /upload?path=/client1/ HTTP/1.1\r\n{}Content-Type: multipart/form-data; boundary=XyZ\r\nContent-Length: 1000\r\n\r\n\
                     --XyZ\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\n\r\npartial",
                    basic("client1")
                )
                .as_bytes(),
            )
            .await;

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("connection still open")
            .unwrap();
        assert!(client.response(false).await.is_none());
        assert!(!dir.path().join("storage/client1/a.txt").exists());
    }

    #[tokio::test]
    async fn stalled_body_before_authorization_ends_the_connection() {
        let dir = TempDir::new().unwrap();
        let app = app_with(&dir, |config| {
            config.read_timeout = Duration::from_millis(100)
        })
        .await;

        let (mut client, handle) = connect(&app);
        client
            .send(b"GET / HTTP/1.1\r\nContent-Length: 50\r\n\r\nabc")
            .await;

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("connection still open")
            .unwrap();
        assert!(client.response(false).await.is_none());
    }

    #[tokio::test]
    async fn malformed_requests_get_400_and_close() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir).await;

        for raw in [
            "BREW /pot HTTP/1.1\r\n\r\n",
            "GET\r\n\r\n",
            "GET / HTTP/1.1\r\nBroken\r\n\r\n",
            "GET /client1/%FF%FE HTTP/1.1\r\n\r\n",
        ] {
            let (mut client, _) = connect(&app);
            let response = client.roundtrip(raw).await;
            assert_eq!(response.status, 400, "{raw:?}");
            assert!(client.closed().await);
        }

        let (mut client, _) = connect(&app);
        let response = client.roundtrip("PUT /client1/x HTTP/1.1\r\n\r\n").await;
        assert_eq!(response.status, 405);
    }

    #[tokio::test]
    async fn oversized_head_is_rejected() {
        let dir = TempDir::new().unwrap();
        let app = app_with(&dir, |config| config.max_header_size = 64).await;

        let (mut client, _) = connect(&app);
        let response = client
            .roundtrip(&format!("GET /{} HTTP/1.1\r\n\r\n", "a".repeat(200)))
            .await;
        assert_eq!(response.status, 400);
    }
}
