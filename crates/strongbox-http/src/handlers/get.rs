use std::io;

use strongbox_auth::{AuthOutcome, Credentials};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{authorize, denied, drain_body, error_response, with_session};
use crate::{
    error::{HttpError, Result},
    path::ResolvedPath,
    range::parse_ranges,
    request::Request,
    response::Response,
    state::AppState,
    transport::Transport,
    view::DirectoryListing,
};

/// Query flag selecting machine-readable listings.
pub const MACHINE_FLAG: &str = "SUSTech-HTTP";
pub const CHUNKED_FLAG: &str = "chunked";

const HTML: &str = "text/html; charset=utf-8";
const PLAIN: &str = "text/plain; charset=utf-8";

/// GET and HEAD. Any authenticated user may read any path.
pub async fn serve<S>(
    state: &AppState,
    request: &Request,
    transport: &mut Transport<S>,
    is_head: bool,
) -> Result<Response>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    drain_body(request, transport, state.config.read_buffer_size).await?;

    let resolved = match state.root.resolve(&request.target) {
        Ok(resolved) => resolved,
        Err(err) => {
            warn!(path = %request.target, error = %err, "rejected request path");
            return Ok(error_response(state, &err.into()));
        }
    };

    if resolved.is_root() {
        return serve_root(state, request, &resolved, is_head).await;
    }

    let (_, outcome) = authorize(state, request, &resolved.owner, false).await?;
    let session_id = match outcome {
        AuthOutcome::Granted { session_id, .. } => session_id,
        AuthOutcome::Denied { status, message } => return Ok(denied(state, status, message)),
    };

    serve_resource(state, request, &resolved, session_id, is_head).await
}

async fn serve_root(
    state: &AppState,
    request: &Request,
    resolved: &ResolvedPath,
    is_head: bool,
) -> Result<Response> {
    let machine = request.query_flag(MACHINE_FLAG);
    let (credentials, outcome) = authorize(state, request, "", false).await?;

    match outcome {
        AuthOutcome::Granted { user, session_id } if machine => {
            debug!(user = %user.name, "machine listing of storage root");
            listing(state, resolved, session_id, true, is_head).await
        }
        AuthOutcome::Granted { user, session_id } => {
            let mut location = format!("/{}", user.name);
            if !request.query.is_empty() {
                location.push('?');
                location.push_str(&request.query_string());
            }
            let builder = state.respond(302, "Found").header("Location", location);
            Ok(with_session(builder, state, session_id).build())
        }
        AuthOutcome::Denied { status, message } if machine => {
            Ok(denied(state, status, message))
        }
        AuthOutcome::Denied { .. }
            if credentials == Credentials::anonymous() || credentials.cookie_based =>
        {
            Ok(state
                .respond(200, "OK")
                .content_type(HTML)
                .text(state.view.render_login())
                .head(is_head)
                .build())
        }
        AuthOutcome::Denied { status, .. } => Ok(denied(state, status, "login failed")),
    }
}

async fn serve_resource(
    state: &AppState,
    request: &Request,
    resolved: &ResolvedPath,
    session_id: Uuid,
    is_head: bool,
) -> Result<Response> {
    let metadata = match tokio::fs::metadata(&resolved.absolute).await {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            let builder = state.respond(404, "Not Found");
            return Ok(with_session(builder, state, session_id).build());
        }
        Err(err) => return Err(HttpError::Io(err)),
    };

    if metadata.is_dir() {
        let machine = request.query_flag(MACHINE_FLAG);
        return listing(state, resolved, session_id, machine, is_head).await;
    }

    let content_type = mime_guess::from_path(&resolved.absolute)
        .first_or_octet_stream()
        .to_string();
    let mut builder = state
        .respond(200, "OK")
        .content_type(content_type)
        .file(&resolved.absolute)
        .head(is_head);

    if let Some(range) = request.header("Range") {
        match parse_ranges(range, metadata.len()) {
            Some(ranges) => builder = builder.ranges(ranges),
            None => {
                debug!(range, size = metadata.len(), "unsatisfiable range");
                let builder = state
                    .respond(416, "Range Not Satisfiable")
                    .header("Content-Range", format!("bytes */{}", metadata.len()));
                return Ok(with_session(builder, state, session_id).build());
            }
        }
    } else {
        builder = builder.chunked(request.query_flag(CHUNKED_FLAG));
    }

    Ok(with_session(builder, state, session_id).build())
}

async fn listing(
    state: &AppState,
    resolved: &ResolvedPath,
    session_id: Uuid,
    machine: bool,
    is_head: bool,
) -> Result<Response> {
    let listing = DirectoryListing::read(&resolved.absolute, &resolved.relative).await?;
    let builder = if machine {
        state
            .respond(200, "OK")
            .content_type(PLAIN)
            .text(state.view.render_listing_machine(&listing))
    } else {
        state
            .respond(200, "OK")
            .content_type(HTML)
            .text(state.view.render_listing(&listing))
    };
    Ok(with_session(builder.head(is_head), state, session_id).build())
}
