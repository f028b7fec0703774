use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

const IO_CHUNK_SIZE: usize = 8 * 1024;

pub(crate) fn head_too_large() -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        "message head exceeded the configured limit",
    )
}

pub(crate) fn body_too_large() -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        "message body exceeded the configured limit",
    )
}

pub(crate) fn is_head_too_large(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::InvalidData && error.to_string().contains("head exceeded")
}

/// A stream plus the bytes read past the last consumed message boundary.
///
/// The buffer makes the read-ahead explicit: when a session flips from HTTP
/// parsing to raw tunnelling, whatever is left in `read_buf` must reach the
/// peer before the byte copy starts.
pub struct BufferedConn<S> {
    pub stream: S,
    pub read_buf: Vec<u8>,
}

impl<S> BufferedConn<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            read_buf: Vec::new(),
        }
    }

    pub fn take_buffered(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.read_buf)
    }
}

impl<S: AsyncRead + Unpin> BufferedConn<S> {
    /// Reads until `pattern` appears and returns everything up to and
    /// including it. Returns `None` on a clean EOF with nothing buffered;
    /// an EOF in the middle of a message is an error.
    pub async fn read_until_pattern(
        &mut self,
        pattern: &[u8],
        max_bytes: usize,
    ) -> io::Result<Option<Vec<u8>>> {
        loop {
            if let Some(start) = find_subsequence(&self.read_buf, pattern) {
                let end = start + pattern.len();
                if end > max_bytes {
                    return Err(head_too_large());
                }
                let bytes = self.read_buf.drain(..end).collect::<Vec<_>>();
                return Ok(Some(bytes));
            }

            if self.read_buf.len() > max_bytes {
                return Err(head_too_large());
            }

            let mut chunk = [0_u8; IO_CHUNK_SIZE];
            let read = self.stream.read(&mut chunk).await?;
            if read == 0 {
                if self.read_buf.is_empty() {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed before the message boundary was reached",
                ));
            }
            self.read_buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Reads exactly `count` bytes, draining the buffer first.
    pub async fn read_exact_bytes(&mut self, count: usize) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(count.min(IO_CHUNK_SIZE));

        let buffered = count.min(self.read_buf.len());
        bytes.extend(self.read_buf.drain(..buffered));

        while bytes.len() < count {
            let mut chunk = [0_u8; IO_CHUNK_SIZE];
            let wanted = (count - bytes.len()).min(IO_CHUNK_SIZE);
            let read = self.stream.read(&mut chunk[..wanted]).await?;
            if read == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed in the middle of a message body",
                ));
            }
            bytes.extend_from_slice(&chunk[..read]);
        }

        Ok(bytes)
    }

    /// Reads until EOF, bounded by `max_bytes`.
    pub async fn read_to_eof(&mut self, max_bytes: usize) -> io::Result<Vec<u8>> {
        let mut bytes = self.take_buffered();

        loop {
            if bytes.len() > max_bytes {
                return Err(body_too_large());
            }

            let mut chunk = [0_u8; IO_CHUNK_SIZE];
            let read = self.stream.read(&mut chunk).await?;
            if read == 0 {
                return Ok(bytes);
            }
            bytes.extend_from_slice(&chunk[..read]);
        }
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::BufferedConn;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn reads_up_to_pattern_and_keeps_the_rest() {
        let (client, server) = tokio::io::duplex(1024);
        let mut conn = BufferedConn::new(server);

        let mut client = client;
        client
            .write_all(b"HEAD / HTTP/1.1\r\n\r\nleftover")
            .await
            .expect("write");
        drop(client);

        let head = conn
            .read_until_pattern(b"\r\n\r\n", 1024)
            .await
            .expect("read")
            .expect("head must be present");
        assert_eq!(head, b"HEAD / HTTP/1.1\r\n\r\n");
        assert_eq!(conn.read_buf, b"leftover");
    }

    #[tokio::test]
    async fn clean_eof_returns_none() {
        let (client, server) = tokio::io::duplex(1024);
        drop(client);
        let mut conn = BufferedConn::new(server);

        let head = conn
            .read_until_pattern(b"\r\n\r\n", 1024)
            .await
            .expect("read");
        assert!(head.is_none());
    }

    #[tokio::test]
    async fn eof_inside_message_is_an_error() {
        let (client, server) = tokio::io::duplex(1024);
        let mut conn = BufferedConn::new(server);

        let mut client = client;
        client.write_all(b"GET / HT").await.expect("write");
        drop(client);

        let error = conn
            .read_until_pattern(b"\r\n\r\n", 1024)
            .await
            .expect_err("must fail");
        assert_eq!(error.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn oversized_head_is_rejected() {
        let (client, server) = tokio::io::duplex(1024);
        let mut conn = BufferedConn::new(server);

        let mut client = client;
        client.write_all(&[b'a'; 64]).await.expect("write");

        let error = conn
            .read_until_pattern(b"\r\n\r\n", 16)
            .await
            .expect_err("must fail");
        assert_eq!(error.kind(), std::io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn exact_read_drains_buffer_first() {
        let (client, server) = tokio::io::duplex(1024);
        let mut conn = BufferedConn::new(server);
        conn.read_buf = b"abc".to_vec();

        let mut client = client;
        client.write_all(b"defgh").await.expect("write");
        drop(client);

        let bytes = conn.read_exact_bytes(6).await.expect("read");
        assert_eq!(bytes, b"abcdef");
        assert_eq!(conn.read_buf, b"");
    }
}
