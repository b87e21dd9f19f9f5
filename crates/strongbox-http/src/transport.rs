use std::{io, time::Duration};

use strongbox_crypto::SessionCipher;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Byte stream that becomes transparently enciphered once a session cipher
/// is installed. Reads are decrypted in place; writes are encrypted into a
/// scratch buffer so callers keep their plaintext.
///
/// With a read timeout set, every read that stays idle that long fails with
/// `io::ErrorKind::TimedOut`.
pub struct Transport<S> {
    stream: S,
    cipher: Option<SessionCipher>,
    scratch: Vec<u8>,
    read_timeout: Option<Duration>,
}

impl<S> Transport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            cipher: None,
            scratch: Vec::new(),
            read_timeout: None,
        }
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    /// Installs the cipher for the rest of the connection. Returns `false`
    /// and leaves the current cipher untouched if one is already active.
    pub fn install_cipher(&mut self, cipher: SessionCipher) -> bool {
        if self.cipher.is_some() {
            return false;
        }
        self.cipher = Some(cipher);
        true
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = match self.read_timeout {
            Some(limit) => tokio::time::timeout(limit, self.stream.read(buf))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "read timed out"))??,
            None => self.stream.read(buf).await?,
        };
        if let Some(cipher) = self.cipher.as_mut() {
            cipher.decrypt(&mut buf[..n]);
        }
        Ok(n)
    }

    /// Appends up to `max` freshly read bytes to `buf`.
    pub async fn read_into(&mut self, buf: &mut Vec<u8>, max: usize) -> io::Result<usize> {
        let start = buf.len();
        buf.resize(start + max, 0);
        match self.read(&mut buf[start..]).await {
            Ok(n) => {
                buf.truncate(start + n);
                Ok(n)
            }
            Err(err) => {
                buf.truncate(start);
                Err(err)
            }
        }
    }

    pub async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match self.cipher.as_mut() {
            Some(cipher) => {
                self.scratch.clear();
                self.scratch.extend_from_slice(data);
                cipher.encrypt(&mut self.scratch);
                self.stream.write_all(&self.scratch).await
            }
            None => self.stream.write_all(data).await,
        }
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        self.stream.flush().await
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }
}
