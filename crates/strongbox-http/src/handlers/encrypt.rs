use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{info, warn};

use super::{Outcome, drain_body, read_body};
use crate::{
    error::Result,
    handshake::{KEY_CONTENT_TYPE, offer_session_key},
    request::Request,
    state::AppState,
    transport::Transport,
};

/// `ENCRYPT`: the body is the client's PEM public key. The reply carries the
/// wrapped session key and goes out before the cipher is switched on.
pub async fn serve<S>(
    state: &AppState,
    request: &Request,
    transport: &mut Transport<S>,
) -> Result<Outcome>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    if transport.is_encrypted() {
        drain_body(request, transport, state.config.read_buffer_size).await?;
        warn!("refusing to renegotiate an encrypted connection");
        return Ok(state.respond(400, "Bad Request").build().into());
    }

    let Some(public_key) = read_body(request, transport, state.config.max_small_body).await? else {
        warn!(
            declared = request.content_length().unwrap_or_default(),
            "public key body too large"
        );
        return Ok(state.respond(400, "Bad Request").build().into());
    };

    match offer_session_key(&public_key) {
        Ok(offer) => {
            info!(wrapped_len = offer.wrapped.len(), "issued session key");
            let response = state
                .respond(200, "OK")
                .content_type(KEY_CONTENT_TYPE)
                .text(offer.wrapped)
                .build();
            Ok(Outcome {
                response,
                session_key: Some(offer.key),
            })
        }
        Err(err) => {
            warn!(error = %err, "handshake failed");
            Ok(state.respond(400, "Bad Request").build().into())
        }
    }
}
