use std::io;

use percent_encoding::percent_decode_str;
use strongbox_auth::AuthOutcome;
use strongbox_common::error::StrongboxError;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{info, warn};
use uuid::Uuid;

use super::{authorize, denied, discard, drain_body, error_response, read_body, with_session};
use crate::{
    error::Result,
    multipart::{MultipartError, boundary_from_content_type, receive_upload},
    path::ResolvedPath,
    request::{Request, parse_query},
    response::Response,
    state::AppState,
    transport::Transport,
};

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

pub async fn serve<S>(
    state: &AppState,
    request: &Request,
    transport: &mut Transport<S>,
) -> Result<Response>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let read_size = state.config.read_buffer_size;
    match request.target.as_str() {
        "/register" => register(state, request, transport).await,
        "/upload" | "/delete" => {
            let Some(path) = request.query_param("path") else {
                drain_body(request, transport, read_size).await?;
                return Ok(state.respond(405, "Invalid Method").build());
            };
            let resolved = match state.root.resolve(path) {
                Ok(resolved) => resolved,
                Err(err) => {
                    warn!(path, error = %err, "rejected request path");
                    drain_body(request, transport, read_size).await?;
                    return Ok(error_response(state, &err.into()));
                }
            };

            let (_, outcome) = authorize(state, request, &resolved.owner, true).await?;
            let session_id = match outcome {
                AuthOutcome::Granted { session_id, .. } => session_id,
                AuthOutcome::Denied { status, message } => {
                    drain_body(request, transport, read_size).await?;
                    return Ok(denied(state, status, message));
                }
            };

            if request.target == "/upload" {
                upload(state, request, transport, &resolved, session_id).await
            } else {
                drain_body(request, transport, read_size).await?;
                delete(state, &resolved, session_id).await
            }
        }
        _ => {
            drain_body(request, transport, read_size).await?;
            Ok(state.respond(400, "Bad Request").build())
        }
    }
}

async fn register<S>(
    state: &AppState,
    request: &Request,
    transport: &mut Transport<S>,
) -> Result<Response>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut params = request.query.clone();
    let is_form = request
        .header("Content-Type")
        .is_some_and(|value| value.trim().starts_with(FORM_URLENCODED));
    if is_form {
        let Some(body) = read_body(request, transport, state.config.max_small_body).await? else {
            return Ok(state.respond(400, "Bad Request").build());
        };
        for (key, value) in parse_query(&String::from_utf8_lossy(&body)) {
            params.insert(form_decode(&key), form_decode(&value));
        }
    } else {
        drain_body(request, transport, state.config.read_buffer_size).await?;
    }

    let name = params.get("user").map(|name| name.trim()).unwrap_or_default();
    let secret = params.get("password").map(String::as_str).unwrap_or_default();
    if name.is_empty() || secret.is_empty() || !is_plain_segment(name) {
        return Ok(state.respond(400, "Bad Request").build());
    }

    let user = match state.auth.users().create_user(name, secret).await {
        Ok(user) => user,
        Err(err @ (StrongboxError::UserAlreadyExists(_) | StrongboxError::InvalidArgument(_))) => {
            return Ok(error_response(state, &err.into()));
        }
        Err(err) => return Err(err.into()),
    };

    let folder = state.root.resolve(&user.name)?;
    tokio::fs::create_dir_all(&folder.absolute).await?;
    info!(user = %user.name, folder = %folder.absolute.display(), "registered user");
    Ok(state.respond(200, "OK").build())
}

async fn upload<S>(
    state: &AppState,
    request: &Request,
    transport: &mut Transport<S>,
    resolved: &ResolvedPath,
    session_id: Uuid,
) -> Result<Response>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let read_size = state.config.read_buffer_size;
    let respond = |status: u16, reason: &str| {
        with_session(state.respond(status, reason), state, session_id).build()
    };

    let metadata = match tokio::fs::metadata(&resolved.absolute).await {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            drain_body(request, transport, read_size).await?;
            return Ok(respond(404, "Not Found"));
        }
        Err(err) => return Err(err.into()),
    };

    if let Some(new_name) = request.header("Rename") {
        drain_body(request, transport, read_size).await?;
        return rename(resolved, new_name, &respond).await;
    }
    if let Some(dir_name) = request.header("Directory") {
        drain_body(request, transport, read_size).await?;
        if !metadata.is_dir() {
            return Ok(respond(400, "You can not upload any thing to a file"));
        }
        return make_directory(resolved, dir_name, &respond).await;
    }

    if !metadata.is_dir() {
        drain_body(request, transport, read_size).await?;
        return Ok(respond(400, "You can not upload any thing to a file"));
    }
    let Some(boundary) = request
        .header("Content-Type")
        .and_then(boundary_from_content_type)
    else {
        drain_body(request, transport, read_size).await?;
        warn!(error = %MultipartError::MissingBoundary, "upload rejected");
        return Ok(respond(400, "Bad Request"));
    };

    match receive_upload(
        transport,
        request.body.clone(),
        &boundary,
        &resolved.absolute,
        read_size,
    )
    .await
    {
        Ok(upload) => {
            // Consume whatever follows the closing boundary.
            let consumed = request.body.len() as u64 + upload.bytes_read;
            let declared = request.content_length().unwrap_or(0) as u64;
            discard(transport, declared.saturating_sub(consumed), read_size).await?;

            for file in &upload.files {
                info!(file = %file.path.display(), size = file.size, "uploaded file");
            }
            Ok(respond(200, "OK"))
        }
        Err(MultipartError::Io(err)) => Err(err.into()),
        Err(err) => {
            warn!(path = %resolved.relative, error = %err, "upload failed");
            Ok(respond(400, "Bad Request"))
        }
    }
}

async fn rename(
    resolved: &ResolvedPath,
    new_name: &str,
    respond: &impl Fn(u16, &str) -> Response,
) -> Result<Response> {
    let Some(name) = last_segment(new_name) else {
        return Ok(respond(400, "Bad Request"));
    };
    if resolved.is_root() || !resolved.relative.contains('/') {
        return Ok(respond(403, "Forbidden"));
    }
    let Some(parent) = resolved.absolute.parent() else {
        return Ok(respond(400, "Bad Request"));
    };

    let destination = parent.join(name);
    if tokio::fs::try_exists(&destination).await? {
        return Ok(respond(400, "File already exists"));
    }
    tokio::fs::rename(&resolved.absolute, &destination).await?;
    info!(from = %resolved.absolute.display(), to = %destination.display(), "renamed");
    Ok(respond(200, "OK"))
}

async fn make_directory(
    resolved: &ResolvedPath,
    dir_name: &str,
    respond: &impl Fn(u16, &str) -> Response,
) -> Result<Response> {
    let Some(name) = last_segment(dir_name) else {
        return Ok(respond(400, "Bad Request"));
    };

    let directory = resolved.absolute.join(name);
    match tokio::fs::create_dir(&directory).await {
        Ok(()) => {
            info!(directory = %directory.display(), "created directory");
            Ok(respond(200, "OK"))
        }
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            Ok(respond(400, "Directory already exists"))
        }
        Err(err) => Err(err.into()),
    }
}

async fn delete(state: &AppState, resolved: &ResolvedPath, session_id: Uuid) -> Result<Response> {
    let respond = |status: u16, reason: &str| {
        with_session(state.respond(status, reason), state, session_id).build()
    };

    let metadata = match tokio::fs::metadata(&resolved.absolute).await {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(respond(404, "Not Found")),
        Err(err) => return Err(err.into()),
    };
    if metadata.is_dir() {
        return Ok(respond(400, "You can not delete a directory"));
    }

    tokio::fs::remove_file(&resolved.absolute).await?;
    info!(file = %resolved.absolute.display(), "deleted file");
    Ok(respond(200, "OK"))
}

/// Final path component of a client supplied name, ignoring trailing
/// separators.
fn last_segment(name: &str) -> Option<&str> {
    let segment = name
        .trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()?
        .trim();
    is_plain_segment(segment).then_some(segment)
}

fn is_plain_segment(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

fn form_decode(value: &str) -> String {
    percent_decode_str(&value.replace('+', " "))
        .decode_utf8_lossy()
        .into_owned()
}
