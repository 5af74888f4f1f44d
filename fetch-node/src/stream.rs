//! Single-exchange stream: owned by whichever side opened or accepted it, released
//! exactly once by a graceful [`Stream::close`] or an abortive [`Stream::reset`].

use std::io;
use std::time::Duration;

use fetch_core::PeerId;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::ctx::Ctx;
use crate::error::FetchError;

/// How long a full close waits for the peer's EOF before resetting instead.
pub const EOF_TIMEOUT: Duration = Duration::from_secs(10);

/// Byte channel supplied by a transport.
pub trait RawStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Abortive close: the peer observes a reset, not a clean EOF.
    fn abort(self: Box<Self>);
}

pub struct Stream {
    io: Option<Box<dyn RawStream>>,
    remote: PeerId,
    protocol: String,
    write_closed: bool,
}

impl Stream {
    pub fn new(io: impl RawStream, remote: PeerId, protocol: impl Into<String>) -> Self {
        Self {
            io: Some(Box::new(io)),
            remote,
            protocol: protocol.into(),
            write_closed: false,
        }
    }

    pub fn remote_peer(&self) -> PeerId {
        self.remote
    }

    /// False once the stream was reset or closed.
    pub fn is_open(&self) -> bool {
        self.io.is_some()
    }

    fn io(&mut self) -> io::Result<&mut Box<dyn RawStream>> {
        self.io
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "stream was reset"))
    }

    /// Write the whole buffer and flush it.
    pub async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        if self.write_closed {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "stream closed for writing",
            ));
        }
        let io = self.io()?;
        io.write_all(buf).await?;
        io.flush().await
    }

    pub async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.io()?.read_exact(buf).await.map(|_| ())
    }

    /// Half-close: tell the peer nothing more will be written. Reading stays possible.
    pub async fn close_write(&mut self) -> io::Result<()> {
        if self.write_closed {
            return Ok(());
        }
        self.io()?.shutdown().await?;
        self.write_closed = true;
        Ok(())
    }

    /// Abortive close. Idempotent.
    pub fn reset(&mut self) {
        if let Some(io) = self.io.take() {
            debug!(peer = %self.remote, protocol = %self.protocol, "resetting stream");
            io.abort();
        }
    }

    /// Graceful full close: stop writing, wait for the peer's EOF, then release.
    /// Trailing data, no EOF within [`EOF_TIMEOUT`] or `ctx` ending first resets the
    /// stream instead.
    pub async fn close(mut self, ctx: &Ctx) -> io::Result<()> {
        let Some(mut io) = self.io.take() else {
            return Ok(());
        };
        let write_closed = self.write_closed;
        let result = tokio::select! {
            biased;
            err = ctx.done() => Err(ctx_error(err)),
            res = tokio::time::timeout(EOF_TIMEOUT, async {
                if !write_closed {
                    io.shutdown().await?;
                }
                let mut buf = [0u8; 1];
                match io.read(&mut buf).await? {
                    0 => Ok(()),
                    _ => Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "unexpected data before EOF",
                    )),
                }
            }) => res.unwrap_or_else(|_| {
                Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "timed out waiting for EOF",
                ))
            }),
        };
        if result.is_err() {
            io.abort();
        }
        result
    }
}

fn ctx_error(err: FetchError) -> io::Error {
    let kind = match err {
        FetchError::DeadlineExceeded => io::ErrorKind::TimedOut,
        _ => io::ErrorKind::Interrupted,
    };
    io::Error::new(kind, err)
}

impl Drop for Stream {
    fn drop(&mut self) {
        // never released explicitly: an early return or a cancelled future
        self.reset();
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("remote", &self.remote)
            .field("protocol", &self.protocol)
            .field("open", &self.is_open())
            .field("write_closed", &self.write_closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::pipe;
    use fetch_core::Keypair;

    fn pair() -> (Stream, Stream) {
        let (a, b) = pipe();
        let pa = Keypair::generate().peer_id();
        let pb = Keypair::generate().peer_id();
        (Stream::new(a, pb, "/test"), Stream::new(b, pa, "/test"))
    }

    #[tokio::test]
    async fn half_close_then_full_close() {
        let (mut a, mut b) = pair();
        a.write_all(b"ping").await.unwrap();
        a.close_write().await.unwrap();
        assert!(a.write_all(b"more").await.is_err());

        let mut buf = [0u8; 4];
        b.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        b.write_all(b"pong").await.unwrap();
        let closer = tokio::spawn(async move { b.close(&Ctx::background()).await });

        a.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
        a.close(&Ctx::background()).await.unwrap();
        closer.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn reset_is_seen_by_peer() {
        let (mut a, mut b) = pair();
        a.reset();
        assert!(!a.is_open());
        let mut buf = [0u8; 1];
        let err = b.read_exact(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        // a second reset and io on a reset stream are harmless
        a.reset();
        assert_eq!(
            a.write_all(b"x").await.unwrap_err().kind(),
            io::ErrorKind::NotConnected
        );
    }

    #[tokio::test]
    async fn drop_resets() {
        let (a, mut b) = pair();
        drop(a);
        let mut buf = [0u8; 1];
        let err = b.read_exact(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[tokio::test]
    async fn close_with_unread_data_resets() {
        let (mut a, mut b) = pair();
        b.write_all(b"junk").await.unwrap();
        assert!(a.close(&Ctx::background()).await.is_err());
        let mut buf = [0u8; 1];
        assert_eq!(
            b.read_exact(&mut buf).await.unwrap_err().kind(),
            io::ErrorKind::ConnectionReset
        );
    }

    #[tokio::test]
    async fn close_gives_up_when_ctx_ends() {
        // the peer never sends EOF; only the context bounds the wait
        let (mut a, mut b) = pair();
        a.close_write().await.unwrap();
        let ctx = Ctx::background().with_timeout(Duration::from_millis(50));
        let started = std::time::Instant::now();
        let err = a.close(&ctx).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(started.elapsed() < EOF_TIMEOUT / 2);
        let mut buf = [0u8; 1];
        assert_eq!(
            b.read_exact(&mut buf).await.unwrap_err().kind(),
            io::ErrorKind::ConnectionReset
        );

        let (a, _b) = pair();
        let ctx = Ctx::background();
        ctx.cancel();
        let err = a.close(&ctx).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
    }
}
