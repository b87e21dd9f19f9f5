use std::{io, io::SeekFrom};

use strongbox_common::time::{format_http_date, now};
use tokio::{
    fs::File,
    io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite},
};
use tracing::trace;
use uuid::Uuid;

use crate::{
    headers::HeaderList,
    range::ByteRange,
    response::{Body, Response},
    transport::Transport,
};

pub const BOUNDARY_TAG: &str = "STRONGBOX";
const DEFAULT_PART_TYPE: &str = "application/octet-stream";

/// Writes `response` to the transport, choosing the body framing from the
/// body variant, its ranges and the chunked flag. Returns the number of body
/// bytes written.
pub async fn send<S>(
    response: Response,
    transport: &mut Transport<S>,
    chunk_size: usize,
) -> io::Result<u64>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let Response {
        version,
        mut status,
        mut reason,
        mut headers,
        body,
        ranges,
        is_head,
        chunked,
    } = response;
    headers.insert("Date", format_http_date(&now()));
    let chunk_size = chunk_size.max(1);

    let path = match body {
        Body::Empty => {
            headers.insert("Content-Length", "0");
            write_head(transport, &version, status, &reason, &headers).await?;
            return Ok(0);
        }
        Body::Text(payload) => {
            headers.insert("Content-Length", payload.len().to_string());
            write_head(transport, &version, status, &reason, &headers).await?;
            if is_head {
                return Ok(0);
            }
            transport.write_all(&payload).await?;
            return Ok(payload.len() as u64);
        }
        Body::File(path) => path,
    };

    let mut file = File::open(&path).await?;
    let total_len = file.metadata().await?.len();
    headers.insert("Accept-Ranges", "bytes");

    if !ranges.is_empty() {
        status = 206;
        reason = "Partial Content".to_string();
    }

    match ranges.as_slice() {
        [] if chunked => {
            headers.remove("Content-Length");
            headers.insert("Transfer-Encoding", "chunked");
            write_head(transport, &version, status, &reason, &headers).await?;
            if is_head {
                return Ok(0);
            }
            write_chunked(&mut file, transport, chunk_size).await
        }
        [] => {
            headers.insert("Content-Length", total_len.to_string());
            write_head(transport, &version, status, &reason, &headers).await?;
            if is_head {
                return Ok(0);
            }
            copy_range(&mut file, transport, 0, total_len, chunk_size).await?;
            Ok(total_len)
        }
        [range] => {
            headers.insert("Content-Range", range.content_range(total_len));
            headers.insert("Content-Length", range.len().to_string());
            write_head(transport, &version, status, &reason, &headers).await?;
            if is_head {
                return Ok(0);
            }
            copy_range(&mut file, transport, range.start, range.len(), chunk_size).await?;
            Ok(range.len())
        }
        ranges => {
            let part_type = headers
                .get("Content-Type")
                .unwrap_or(DEFAULT_PART_TYPE)
                .to_string();
            let layout = ByteRangesLayout::new(ranges, &part_type, total_len);
            headers.insert(
                "Content-Type",
                format!("multipart/byteranges; boundary={}", layout.boundary),
            );
            headers.insert("Content-Length", layout.content_length().to_string());
            write_head(transport, &version, status, &reason, &headers).await?;
            if is_head {
                return Ok(0);
            }

            for (part_head, range) in layout.part_heads.iter().zip(ranges) {
                transport.write_all(part_head.as_bytes()).await?;
                copy_range(&mut file, transport, range.start, range.len(), chunk_size).await?;
                transport.write_all(b"\r\n").await?;
            }
            transport.write_all(layout.closing.as_bytes()).await?;
            trace!(path = %path.display(), parts = ranges.len(), "sent multipart byteranges");
            Ok(layout.content_length())
        }
    }
}

pub fn render_head(version: &str, status: u16, reason: &str, headers: &HeaderList) -> String {
    let mut head = format!("HTTP/{version} {status} {reason}\r\n");
    for (name, value) in headers.iter() {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");
    head
}

async fn write_head<S>(
    transport: &mut Transport<S>,
    version: &str,
    status: u16,
    reason: &str,
    headers: &HeaderList,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    transport
        .write_all(render_head(version, status, reason, headers).as_bytes())
        .await
}

/// Precomputed framing of a multipart/byteranges body, so the total length
/// is known before any part is written.
struct ByteRangesLayout {
    boundary: String,
    part_heads: Vec<String>,
    closing: String,
    body_len: u64,
}

impl ByteRangesLayout {
    fn new(ranges: &[ByteRange], part_type: &str, total_len: u64) -> Self {
        let boundary = format!("{BOUNDARY_TAG}{}", Uuid::new_v4().simple());
        let part_heads: Vec<String> = ranges
            .iter()
            .map(|range| {
                format!(
                    "--{boundary}\r\nContent-Type: {part_type}\r\nContent-Range: {}\r\nContent-Length: {}\r\n\r\n",
                    range.content_range(total_len),
                    range.len()
                )
            })
            .collect();
        let closing = format!("--{boundary}--\r\n");
        let body_len = part_heads
            .iter()
            .zip(ranges)
            .map(|(head, range)| head.len() as u64 + range.len() + 2)
            .sum::<u64>()
            + closing.len() as u64;

        Self {
            boundary,
            part_heads,
            closing,
            body_len,
        }
    }

    fn content_length(&self) -> u64 {
        self.body_len
    }
}

async fn write_chunked<S>(
    file: &mut File,
    transport: &mut Transport<S>,
    chunk_size: usize,
) -> io::Result<u64>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut buf = vec![0u8; chunk_size];
    let mut written = 0u64;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        transport.write_all(format!("{n:X}\r\n").as_bytes()).await?;
        transport.write_all(&buf[..n]).await?;
        transport.write_all(b"\r\n").await?;
        written += n as u64;
    }
    transport.write_all(b"0\r\n\r\n").await?;
    Ok(written)
}

async fn copy_range<S>(
    file: &mut File,
    transport: &mut Transport<S>,
    start: u64,
    len: u64,
    chunk_size: usize,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    file.seek(SeekFrom::Start(start)).await?;
    let mut buf = vec![0u8; chunk_size];
    let mut remaining = len;
    while remaining > 0 {
        let want = remaining.min(chunk_size as u64) as usize;
        let n = file.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "file shrank while it was being sent",
            ));
        }
        transport.write_all(&buf[..n]).await?;
        remaining -= n as u64;
    }
    Ok(())
}
