//! Encrypted stream adapter
//!
//! Each direction starts with a random salt followed by a sequence of chunks:
//!
//! ```text
//! +------+---------------------------+---------------------------+-----
//! | SALT | seal(len: u16 BE) ‖ tag   | seal(payload) ‖ tag       | ...
//! +------+---------------------------+---------------------------+-----
//! ```
//!
//! The writer only accepts new data once the previous chunk has been fully
//! handed to the inner stream, so at most one chunk is ever buffered.

use super::aead::{derive_subkey, ChunkCipher, TAG_LEN};
use super::CipherKind;
use bytes::{Buf, BytesMut};
use rand::RngCore;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Largest payload carried by one chunk
pub const MAX_PAYLOAD: usize = 0x3FFF;

const SCRATCH_SIZE: usize = 2 + TAG_LEN + MAX_PAYLOAD + TAG_LEN;

/// A stream wrapped by a [`Cipher`](super::Cipher)
///
/// With the dummy cipher every call goes straight to the inner stream.
pub struct ShadowStream<S> {
    inner: S,
    session: Option<Box<Session>>,
}

struct Session {
    kind: CipherKind,
    key: Arc<[u8]>,
    reader: Reader,
    writer: Writer,
}

struct Reader {
    cipher: Option<ChunkCipher>,
    raw: BytesMut,
    plain: BytesMut,
    pending_len: Option<usize>,
    scratch: Box<[u8]>,
}

struct Writer {
    cipher: Option<ChunkCipher>,
    out: BytesMut,
}

impl<S> ShadowStream<S> {
    pub(super) fn plain(inner: S) -> Self {
        ShadowStream {
            inner,
            session: None,
        }
    }

    pub(super) fn aead(inner: S, kind: CipherKind, key: Arc<[u8]>) -> Self {
        let session = Session {
            kind,
            key,
            reader: Reader {
                cipher: None,
                raw: BytesMut::new(),
                plain: BytesMut::new(),
                pending_len: None,
                scratch: vec![0u8; SCRATCH_SIZE].into_boxed_slice(),
            },
            writer: Writer {
                cipher: None,
                out: BytesMut::new(),
            },
        };

        ShadowStream {
            inner,
            session: Some(Box::new(session)),
        }
    }
}

impl Reader {
    /// Consume as much buffered ciphertext as possible.
    ///
    /// Returns `true` if progress was made.
    fn decode(&mut self, kind: CipherKind, key: &[u8]) -> io::Result<bool> {
        let cipher = match self.cipher.as_mut() {
            Some(cipher) => cipher,
            None => {
                let salt_len = kind.salt_len();
                if self.raw.len() < salt_len {
                    return Ok(false);
                }
                let salt = self.raw.split_to(salt_len);
                let subkey = derive_subkey(key, &salt)?;
                self.cipher = Some(ChunkCipher::new(kind, &subkey)?);
                return Ok(true);
            }
        };

        match self.pending_len {
            None => {
                if self.raw.len() < 2 + TAG_LEN {
                    return Ok(false);
                }
                let sealed = self.raw.split_to(2 + TAG_LEN);
                let len = cipher.open(&sealed)?;
                let len = (u16::from_be_bytes([len[0], len[1]]) as usize) & MAX_PAYLOAD;
                self.pending_len = Some(len);
                Ok(true)
            }
            Some(len) => {
                if self.raw.len() < len + TAG_LEN {
                    return Ok(false);
                }
                let sealed = self.raw.split_to(len + TAG_LEN);
                let payload = cipher.open(&sealed)?;
                self.plain.extend_from_slice(&payload);
                self.pending_len = None;
                Ok(true)
            }
        }
    }

    fn is_idle(&self) -> bool {
        self.raw.is_empty() && self.pending_len.is_none()
    }
}

fn poll_drain<S>(inner: &mut S, out: &mut BytesMut, cx: &mut Context<'_>) -> Poll<io::Result<()>>
where
    S: AsyncWrite + Unpin,
{
    while !out.is_empty() {
        let n = ready!(Pin::new(&mut *inner).poll_write(cx, &out[..]))?;
        if n == 0 {
            return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
        }
        out.advance(n);
    }
    Poll::Ready(Ok(()))
}

impl<S> AsyncRead for ShadowStream<S>
where
    S: AsyncRead + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let session = match this.session.as_mut() {
            Some(session) => session,
            None => return Pin::new(&mut this.inner).poll_read(cx, buf),
        };

        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let kind = session.kind;
        let key = &session.key;
        let reader = &mut session.reader;

        loop {
            if !reader.plain.is_empty() {
                let n = reader.plain.len().min(buf.remaining());
                buf.put_slice(&reader.plain[..n]);
                reader.plain.advance(n);
                return Poll::Ready(Ok(()));
            }

            if reader.decode(kind, key)? {
                continue;
            }

            let mut raw_buf = ReadBuf::new(&mut reader.scratch);
            ready!(Pin::new(&mut this.inner).poll_read(cx, &mut raw_buf))?;
            let filled = raw_buf.filled();

            if filled.is_empty() {
                if reader.is_idle() {
                    return Poll::Ready(Ok(()));
                }
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended inside an encrypted chunk",
                )));
            }

            reader.raw.extend_from_slice(filled);
        }
    }
}

impl<S> AsyncWrite for ShadowStream<S>
where
    S: AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let session = match this.session.as_mut() {
            Some(session) => session,
            None => return Pin::new(&mut this.inner).poll_write(cx, buf),
        };

        let writer = &mut session.writer;
        ready!(poll_drain(&mut this.inner, &mut writer.out, cx))?;

        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let cipher = match writer.cipher.take() {
            Some(cipher) => cipher,
            None => {
                let mut salt = vec![0u8; session.kind.salt_len()];
                rand::thread_rng().fill_bytes(&mut salt);
                let subkey = derive_subkey(&session.key, &salt)?;
                writer.out.extend_from_slice(&salt);
                ChunkCipher::new(session.kind, &subkey)?
            }
        };
        let cipher = writer.cipher.insert(cipher);

        let n = buf.len().min(MAX_PAYLOAD);
        let sealed_len = cipher.seal(&(n as u16).to_be_bytes())?;
        let sealed_payload = cipher.seal(&buf[..n])?;
        writer.out.extend_from_slice(&sealed_len);
        writer.out.extend_from_slice(&sealed_payload);

        // The chunk is accepted either way; a pending drain resumes on the next call.
        if let Poll::Ready(Err(e)) = poll_drain(&mut this.inner, &mut writer.out, cx) {
            return Poll::Ready(Err(e));
        }

        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Some(session) = this.session.as_mut() {
            ready!(poll_drain(&mut this.inner, &mut session.writer.out, cx))?;
        }
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Some(session) = this.session.as_mut() {
            ready!(poll_drain(&mut this.inner, &mut session.writer.out, cx))?;
        }
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}
