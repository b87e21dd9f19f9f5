use std::{
    io,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::transport::Transport;

const MAX_PART_HEAD: usize = 16 * 1024;
const MAX_NAME_ATTEMPTS: u32 = 10_000;

#[derive(Debug, Error)]
pub enum MultipartError {
    #[error("content type carries no multipart boundary")]
    MissingBoundary,
    #[error("stream ended before the closing boundary")]
    UnexpectedEof,
    #[error("malformed part: {0}")]
    MalformedPart(String),
    #[error("unsafe file name: {0:?}")]
    UnsafeFilename(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, MultipartError>;

/// Result of a completed upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Upload {
    pub files: Vec<UploadedFile>,
    /// Bytes pulled from the transport beyond the initial buffer.
    pub bytes_read: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Extracts the `boundary` parameter of a `multipart/form-data` content type.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("boundary") {
            return None;
        }
        let value = value.trim().trim_matches('"');
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// Streams every file part of a multipart body into `dest_dir`.
///
/// `initial` holds body bytes already read along with the request head. A
/// part whose body is cut short is removed again; parts completed before the
/// failure stay on disk.
pub async fn receive_upload<S>(
    transport: &mut Transport<S>,
    initial: Vec<u8>,
    boundary: &str,
    dest_dir: &Path,
    read_size: usize,
) -> Result<Upload>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut reader = PartReader {
        transport,
        buf: initial,
        read_size: read_size.max(1),
        bytes_read: 0,
    };
    let dash_boundary = format!("--{boundary}").into_bytes();
    let body_delimiter = [b"\r\n".as_slice(), dash_boundary.as_slice()].concat();

    // Skip the preamble.
    loop {
        if let Some(pos) = find(&reader.buf, &dash_boundary) {
            reader.buf.drain(..pos + dash_boundary.len());
            break;
        }
        let keep = dash_boundary.len() - 1;
        if reader.buf.len() > keep {
            let drop_len = reader.buf.len() - keep;
            reader.buf.drain(..drop_len);
        }
        if !reader.fill().await? {
            return Err(MultipartError::UnexpectedEof);
        }
    }

    let mut uploaded = Vec::new();
    loop {
        reader.ensure(2).await?;
        if reader.buf.starts_with(b"--") {
            return Ok(Upload {
                files: uploaded,
                bytes_read: reader.bytes_read,
            });
        }
        if !reader.buf.starts_with(b"\r\n") {
            return Err(MultipartError::MalformedPart(
                "boundary not followed by CRLF".to_string(),
            ));
        }
        reader.buf.drain(..2);

        let head = reader.part_head().await?;
        let name = match filename_from_head(&head) {
            Some(name) => safe_basename(&name)?,
            None => format!("{}.tmp", Uuid::new_v4()),
        };
        let (mut file, path, name) = create_unique(dest_dir, &name).await?;

        match reader.copy_part(&mut file, &body_delimiter).await {
            Ok(size) => {
                debug!(file = %path.display(), size, "stored upload part");
                uploaded.push(UploadedFile { name, path, size });
            }
            Err(err) => {
                drop(file);
                if let Err(remove_err) = tokio::fs::remove_file(&path).await {
                    warn!(file = %path.display(), error = %remove_err, "failed to remove partial upload");
                }
                return Err(err);
            }
        }
    }
}

struct PartReader<'a, S> {
    transport: &'a mut Transport<S>,
    buf: Vec<u8>,
    read_size: usize,
    bytes_read: u64,
}

impl<S> PartReader<'_, S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn fill(&mut self) -> Result<bool> {
        let n = self.transport.read_into(&mut self.buf, self.read_size).await?;
        self.bytes_read += n as u64;
        Ok(n > 0)
    }

    async fn ensure(&mut self, len: usize) -> Result<()> {
        while self.buf.len() < len {
            if !self.fill().await? {
                return Err(MultipartError::UnexpectedEof);
            }
        }
        Ok(())
    }

    /// Header lines of the current part, consuming the blank line after them.
    async fn part_head(&mut self) -> Result<String> {
        loop {
            if self.buf.starts_with(b"\r\n") {
                self.buf.drain(..2);
                return Ok(String::new());
            }
            if let Some(pos) = find(&self.buf, b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&self.buf[..pos]).into_owned();
                self.buf.drain(..pos + 4);
                return Ok(head);
            }
            if self.buf.len() > MAX_PART_HEAD {
                return Err(MultipartError::MalformedPart(
                    "part headers too large".to_string(),
                ));
            }
            if !self.fill().await? {
                return Err(MultipartError::UnexpectedEof);
            }
        }
    }

    /// Copies bytes up to `delimiter` into `file`, keeping enough of a tail
    /// buffered to spot a delimiter split across reads.
    async fn copy_part(&mut self, file: &mut File, delimiter: &[u8]) -> Result<u64> {
        let mut size = 0u64;
        loop {
            if let Some(pos) = find(&self.buf, delimiter) {
                file.write_all(&self.buf[..pos]).await?;
                file.flush().await?;
                self.buf.drain(..pos + delimiter.len());
                return Ok(size + pos as u64);
            }

            let keep = delimiter.len() - 1;
            if self.buf.len() > keep {
                let flush_len = self.buf.len() - keep;
                file.write_all(&self.buf[..flush_len]).await?;
                self.buf.drain(..flush_len);
                size += flush_len as u64;
            }
            if !self.fill().await? {
                return Err(MultipartError::UnexpectedEof);
            }
        }
    }
}

fn filename_from_head(head: &str) -> Option<String> {
    head.split("\r\n")
        .filter_map(|line| line.split_once(':'))
        .filter(|(name, _)| name.trim().eq_ignore_ascii_case("content-disposition"))
        .find_map(|(_, value)| {
            value.split(';').skip(1).find_map(|param| {
                let (key, value) = param.split_once('=')?;
                key.trim()
                    .eq_ignore_ascii_case("filename")
                    .then(|| value.trim().trim_matches('"').to_string())
            })
        })
}

/// Strips directory components; rejects names that cannot denote a file.
fn safe_basename(name: &str) -> Result<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    if base.is_empty() || base == "." || base == ".." || base.contains('\0') {
        return Err(MultipartError::UnsafeFilename(name.to_string()));
    }
    Ok(base.to_string())
}

/// Opens a new file named `name` in `dir`, falling back to `stem (n).ext`
/// while the name is taken.
async fn create_unique(dir: &Path, name: &str) -> Result<(File, PathBuf, String)> {
    let (stem, ext) = match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    };

    for attempt in 0..MAX_NAME_ATTEMPTS {
        let candidate = if attempt == 0 {
            name.to_string()
        } else {
            format!("{stem} ({attempt}){ext}")
        };
        let path = dir.join(&candidate);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => return Ok((file, path, candidate)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Err(MultipartError::UnsafeFilename(name.to_string()))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use tokio::io::{AsyncWriteExt, duplex};

    use super::*;

    const BOUNDARY: &str = "----strongbox7MA4YWxkTrZu0gW";

    fn part(filename: &str, content: &[u8]) -> Vec<u8> {
        let mut part = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .into_bytes();
        part.extend_from_slice(content);
        part.extend_from_slice(b"\r\n");
        part
    }

    fn closing() -> Vec<u8> {
        format!("--{BOUNDARY}--\r\n").into_bytes()
    }

    async fn upload(body: Vec<u8>, split: usize, dir: &Path) -> Result<Vec<UploadedFile>> {
        let (server, mut client) = duplex(1 << 20);
        let mut transport = Transport::new(server);
        let split = split.min(body.len());
        let initial = body[..split].to_vec();
        client.write_all(&body[split..]).await.unwrap();
        drop(client);
        let upload = receive_upload(&mut transport, initial, BOUNDARY, dir, 5).await?;
        assert!(upload.bytes_read <= (body.len() - split) as u64);
        Ok(upload.files)
    }

    #[test]
    fn boundary_parameter() {
        assert_eq!(
            boundary_from_content_type("multipart/form-data; boundary=abc").as_deref(),
            Some("abc")
        );
        assert_eq!(
            boundary_from_content_type("multipart/form-data; charset=utf-8; BOUNDARY=\"x y\"")
                .as_deref(),
            Some("x y")
        );
        assert!(boundary_from_content_type("multipart/form-data").is_none());
        assert!(boundary_from_content_type("multipart/form-data; boundary=").is_none());
    }

    #[tokio::test]
    async fn two_parts_land_byte_identical() {
        let dir = TempDir::new().unwrap();
        let first = b"line one\r\nline two\r\n--not-a-boundary".to_vec();
        let second: Vec<u8> = (0u8..=255).cycle().take(3000).collect();

        let mut body = b"preamble\r\n".to_vec();
        body.extend(part("a.txt", &first));
        body.extend(part("dir/b.bin", &second));
        body.extend(closing());

        for split in [0, 17, 120, body.len()] {
            let dest = dir.path().join(format!("split{split}"));
            std::fs::create_dir(&dest).unwrap();
            let files = upload(body.clone(), split, &dest).await.unwrap();

            let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
            assert_eq!(names, ["a.txt", "b.bin"]);
            assert_eq!(std::fs::read(dest.join("a.txt")).unwrap(), first);
            assert_eq!(std::fs::read(dest.join("b.bin")).unwrap(), second);
            assert_eq!(files[1].size, 3000);
        }
    }

    #[tokio::test]
    async fn colliding_names_get_a_suffix() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"old").unwrap();

        let mut body = part("notes.txt", b"one");
        body.extend(part("notes.txt", b"two"));
        body.extend(closing());
        let files = upload(body, 0, dir.path()).await.unwrap();

        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["notes (1).txt", "notes (2).txt"]);
        assert_eq!(std::fs::read(dir.path().join("notes.txt")).unwrap(), b"old");
        assert_eq!(std::fs::read(dir.path().join("notes (2).txt")).unwrap(), b"two");
    }

    #[tokio::test]
    async fn missing_filename_gets_a_generated_name() {
        let dir = TempDir::new().unwrap();
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nhello\r\n"
        )
        .into_bytes();
        body.extend(closing());

        let files = upload(body, 0, dir.path()).await.unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].name.ends_with(".tmp"));
        assert_eq!(std::fs::read(&files[0].path).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn truncated_stream_removes_partial_file() {
        let dir = TempDir::new().unwrap();
        let mut body = part("kept.txt", b"complete");
        body.extend(part("cut.txt", b"never finished"));
        body.truncate(body.len() - 6);

        let err = upload(body, 0, dir.path()).await.unwrap_err();
        assert!(matches!(err, MultipartError::UnexpectedEof));
        assert!(dir.path().join("kept.txt").exists());
        assert!(!dir.path().join("cut.txt").exists());
    }

    #[tokio::test]
    async fn unsafe_names_are_rejected() {
        let dir = TempDir::new().unwrap();
        for name in ["", "..", "dir/", "a\\.."] {
            let mut body = part(name, b"x");
            body.extend(closing());
            let err = upload(body, 0, dir.path()).await.unwrap_err();
            assert!(matches!(err, MultipartError::UnsafeFilename(_)), "{name:?}");
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn missing_boundary_is_eof() {
        let dir = TempDir::new().unwrap();
        let err = upload(b"no boundary here".to_vec(), 3, dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, MultipartError::UnexpectedEof));
    }
}
