//! Bidirectional relay
//!
//! Both directions run concurrently in the calling task. The first direction
//! to finish (EOF, error, or cancellation) fires a private expiry token; a
//! direction still blocked on read or write then fails with
//! `io::ErrorKind::TimedOut`. [`relay`] returns once both have stopped.

use crate::helper::DEFAULT_BUFFER_SIZE;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// Outcome of one relay
#[derive(Debug)]
pub struct RelayResult {
    /// Bytes written to the right side
    pub left_to_right: u64,
    /// Bytes written to the left side
    pub right_to_left: u64,
    /// Error of the first direction to stop, else the other direction's
    pub error: Option<io::Error>,
}

impl RelayResult {
    /// Error worth reporting, skipping forced expiry and shutdown
    pub fn failure(&self) -> Option<&io::Error> {
        self.error
            .as_ref()
            .filter(|e| !crate::error::is_benign(e))
    }
}

fn expired() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "relay expired")
}

/// Copy until EOF, error, or expiry. The count only includes bytes the writer accepted.
async fn copy_until_expired<R, W>(
    reader: &mut R,
    writer: &mut W,
    expiry: &CancellationToken,
) -> (u64, io::Result<()>)
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; DEFAULT_BUFFER_SIZE];
    let mut copied = 0u64;

    loop {
        let n = tokio::select! {
            biased;
            _ = expiry.cancelled() => return (copied, Err(expired())),
            r = reader.read(&mut buf) => match r {
                Ok(0) => return (copied, Ok(())),
                Ok(n) => n,
                Err(e) => return (copied, Err(e)),
            },
        };

        let mut offset = 0;
        while offset < n {
            let written = tokio::select! {
                biased;
                _ = expiry.cancelled() => return (copied, Err(expired())),
                w = writer.write(&buf[offset..n]) => match w {
                    Ok(0) => return (copied, Err(io::ErrorKind::WriteZero.into())),
                    Ok(w) => w,
                    Err(e) => return (copied, Err(e)),
                },
            };
            offset += written;
            copied += written as u64;
        }

        let flushed = tokio::select! {
            biased;
            _ = expiry.cancelled() => Err(expired()),
            f = writer.flush() => f,
        };
        if let Err(e) = flushed {
            return (copied, Err(e));
        }
    }
}

/// Copy bytes between `left` and `right` in both directions.
pub async fn relay<L, R>(left: &mut L, right: &mut R) -> RelayResult
where
    L: AsyncRead + AsyncWrite + Unpin + ?Sized,
    R: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let expiry = CancellationToken::new();
    let (mut left_read, mut left_write) = tokio::io::split(left);
    let (mut right_read, mut right_write) = tokio::io::split(right);

    let finish = |res: (u64, io::Result<()>)| {
        let first = !expiry.is_cancelled();
        expiry.cancel();
        (res.0, res.1.err(), first)
    };

    let (l2r, r2l) = tokio::join!(
        async { finish(copy_until_expired(&mut left_read, &mut right_write, &expiry).await) },
        async { finish(copy_until_expired(&mut right_read, &mut left_write, &expiry).await) },
    );

    let (l2r_bytes, l2r_err, l2r_first) = l2r;
    let (r2l_bytes, r2l_err, _) = r2l;
    let error = if l2r_first {
        l2r_err.or(r2l_err)
    } else {
        r2l_err.or(l2r_err)
    };

    RelayResult {
        left_to_right: l2r_bytes,
        right_to_left: r2l_bytes,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_relay_lossless_both_ways() {
        let (mut client, mut left) = duplex(1024);
        let (mut right, mut server) = duplex(1024);

        let relay_task = tokio::spawn(async move { relay(&mut left, &mut right).await });

        client.write_all(b"request").await.unwrap();
        let mut buf = [0u8; 7];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"request");

        server.write_all(b"response!").await.unwrap();
        let mut buf = [0u8; 9];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"response!");

        drop(client);
        let result = tokio::time::timeout(Duration::from_secs(1), relay_task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.left_to_right, 7);
        assert_eq!(result.right_to_left, 9);
    }

    #[tokio::test]
    async fn test_relay_returns_when_one_side_is_silent() {
        let (client, mut left) = duplex(1024);
        let (mut right, _server) = duplex(1024);

        drop(client);
        let start = Instant::now();
        let result = tokio::time::timeout(Duration::from_secs(1), relay(&mut left, &mut right))
            .await
            .expect("relay must not hang on the silent direction");

        assert!(start.elapsed() < Duration::from_millis(500));
        assert_eq!(result.left_to_right, 0);
        assert_eq!(result.right_to_left, 0);
        // Left hit EOF first; the right direction was forced to expire.
        let err = result.error.as_ref().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(result.failure().is_none());
    }

    #[tokio::test]
    async fn test_relay_large_transfer_counts() {
        let (mut client, mut left) = duplex(4096);
        let (mut right, mut server) = duplex(4096);

        let relay_task = tokio::spawn(async move { relay(&mut left, &mut right).await });

        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 253) as u8).collect();
        let expected = data.clone();
        let reader = tokio::spawn(async move {
            let mut received = vec![0u8; expected.len()];
            server.read_exact(&mut received).await.unwrap();
            assert_eq!(received, expected);
            server
        });

        client.write_all(&data).await.unwrap();
        let _server = reader.await.unwrap();
        drop(client);

        let result = relay_task.await.unwrap();
        assert_eq!(result.left_to_right, data.len() as u64);
        assert_eq!(result.right_to_left, 0);
    }

    #[tokio::test]
    async fn test_relay_reports_first_error() {
        let mut left = tokio_test::io::Builder::new()
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let (mut right, _server) = duplex(64);

        let result = relay(&mut left, &mut right).await;
        let err = result.failure().expect("reset should be reported");
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[tokio::test]
    async fn test_relay_partial_counts_on_error() {
        let mut left = tokio_test::io::Builder::new()
            .read(b"abc")
            .read_error(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
            .build();
        let (mut right, mut server) = duplex(64);

        let result = relay(&mut left, &mut right).await;
        assert_eq!(result.left_to_right, 3);
        assert_eq!(result.error.unwrap().kind(), io::ErrorKind::BrokenPipe);

        let mut buf = [0u8; 3];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"abc");
    }
}
