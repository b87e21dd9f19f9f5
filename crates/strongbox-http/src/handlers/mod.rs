pub mod encrypt;
pub mod get;
pub mod post;

use strongbox_auth::{AuthOutcome, Credentials, session_cookie_header};
use strongbox_crypto::SessionKey;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;
use uuid::Uuid;

use crate::{
    error::{HttpError, Result},
    request::{Method, Request},
    response::{Response, ResponseBuilder},
    state::AppState,
    transport::Transport,
};

/// What the connection has to do after a request was handled.
#[derive(Debug)]
pub struct Outcome {
    pub response: Response,
    /// Installed on the transport once `response` has been sent.
    pub session_key: Option<SessionKey>,
}

impl From<Response> for Outcome {
    fn from(response: Response) -> Self {
        Self {
            response,
            session_key: None,
        }
    }
}

pub async fn dispatch<S>(
    state: &AppState,
    request: &Request,
    transport: &mut Transport<S>,
) -> Result<Outcome>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    match request.method {
        Method::Get => Ok(get::serve(state, request, transport, false).await?.into()),
        Method::Head => Ok(get::serve(state, request, transport, true).await?.into()),
        Method::Post => Ok(post::serve(state, request, transport).await?.into()),
        Method::Encrypt => encrypt::serve(state, request, transport).await,
        Method::Put | Method::Delete => {
            drain_body(request, transport, state.config.read_buffer_size).await?;
            Ok(state.respond(405, "Method Not Allowed").build().into())
        }
    }
}

/// Reads and discards the declared body bytes that have not arrived yet.
pub(crate) async fn drain_body<S>(
    request: &Request,
    transport: &mut Transport<S>,
    read_size: usize,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    discard(transport, request.unread_body_len() as u64, read_size).await
}

pub(crate) async fn discard<S>(
    transport: &mut Transport<S>,
    mut remaining: u64,
    read_size: usize,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut buf = vec![0u8; read_size.max(1)];
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = transport.read(&mut buf[..want]).await?;
        if n == 0 {
            break;
        }
        remaining -= n as u64;
    }
    Ok(())
}

/// Completes the body of a small request. `None` if the declared length
/// exceeds `limit`.
pub(crate) async fn read_body<S>(
    request: &Request,
    transport: &mut Transport<S>,
    limit: usize,
) -> Result<Option<Vec<u8>>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let declared = request.content_length().unwrap_or(request.body.len());
    if declared > limit {
        return Ok(None);
    }

    let mut body = request.body.clone();
    body.truncate(declared);
    while body.len() < declared {
        let want = declared - body.len();
        if transport.read_into(&mut body, want).await? == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }
    }
    Ok(Some(body))
}

/// Credentials carried by the request and the verdict on them.
pub(crate) async fn authorize(
    state: &AppState,
    request: &Request,
    owner: &str,
    check_ownership: bool,
) -> Result<(Credentials, AuthOutcome)> {
    let credentials = state
        .auth
        .extract(request.header("Authorization"), request.header("Cookie"))
        .await?;
    let outcome = state
        .auth
        .verify(owner, &credentials, check_ownership)
        .await?;
    if let AuthOutcome::Denied { status, message } = &outcome {
        debug!(owner, status, reason = *message, "request not authorized");
    }
    Ok((credentials, outcome))
}

pub(crate) fn denied(state: &AppState, status: u16, message: &str) -> Response {
    if status == 401 {
        state
            .respond(401, "Unauthorized")
            .header("WWW-Authenticate", format!("Basic realm=\"{message}\""))
            .build()
    } else {
        state.respond(status, message).build()
    }
}

pub(crate) fn with_session(
    builder: ResponseBuilder,
    state: &AppState,
    session_id: Uuid,
) -> ResponseBuilder {
    builder.header(
        "Set-Cookie",
        session_cookie_header(session_id, state.auth.session_ttl()),
    )
}

pub(crate) fn error_response(state: &AppState, err: &HttpError) -> Response {
    let (status, reason) = err.status();
    state.respond(status, reason).build()
}
