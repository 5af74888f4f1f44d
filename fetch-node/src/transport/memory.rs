//! In-process transport: hosts on a shared [`MemoryNetwork`], streams are duplex pipes.

use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::task::{Context, Poll};

use fetch_core::{Keypair, PeerId};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tracing::debug;

use super::{unsupported, Host, StreamHandler};
use crate::stream::{RawStream, Stream};

const PIPE_CAPACITY: usize = 64 * 1024;

/// One end of an in-memory pipe. A reset on either end is reported to the other
/// as `ConnectionReset` rather than a clean EOF.
#[derive(Debug)]
pub struct MemoryStream {
    io: DuplexStream,
    reset: Arc<AtomicBool>,
}

/// Connected pair of in-memory stream ends.
pub fn pipe() -> (MemoryStream, MemoryStream) {
    let (a, b) = tokio::io::duplex(PIPE_CAPACITY);
    let reset = Arc::new(AtomicBool::new(false));
    (
        MemoryStream {
            io: a,
            reset: reset.clone(),
        },
        MemoryStream { io: b, reset },
    )
}

impl MemoryStream {
    fn is_reset(&self) -> bool {
        self.reset.load(Ordering::SeqCst)
    }
}

fn reset_error() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionReset, "stream reset by peer")
}

impl AsyncRead for MemoryStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.is_reset() {
            return Poll::Ready(Err(reset_error()));
        }
        let before = buf.filled().len();
        match Pin::new(&mut this.io).poll_read(cx, buf) {
            // the other end went away: EOF unless it was a reset
            Poll::Ready(Ok(())) if buf.filled().len() == before && this.is_reset() => {
                Poll::Ready(Err(reset_error()))
            }
            other => other,
        }
    }
}

impl AsyncWrite for MemoryStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.is_reset() {
            return Poll::Ready(Err(reset_error()));
        }
        Pin::new(&mut this.io).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_shutdown(cx)
    }
}

impl RawStream for MemoryStream {
    fn abort(self: Box<Self>) {
        // set before the pipe end drops, so the peer's wakeup already sees it
        self.reset.store(true, Ordering::SeqCst);
    }
}

struct HostShared {
    peer: PeerId,
    handlers: RwLock<HashMap<String, StreamHandler>>,
}

impl HostShared {
    fn handler(&self, protocol: &str) -> Option<StreamHandler> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(protocol)
            .cloned()
    }
}

/// Registry of in-process hosts, addressed by peer ID. A host stays reachable until dropped.
#[derive(Default)]
pub struct MemoryNetwork {
    hosts: RwLock<HashMap<PeerId, Weak<HostShared>>>,
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Join the network with a fresh identity.
    pub fn new_host(self: &Arc<Self>) -> MemoryHost {
        self.add_host(&Keypair::generate())
    }

    pub fn add_host(self: &Arc<Self>, keypair: &Keypair) -> MemoryHost {
        let shared = Arc::new(HostShared {
            peer: keypair.peer_id(),
            handlers: RwLock::new(HashMap::new()),
        });
        self.hosts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(shared.peer, Arc::downgrade(&shared));
        MemoryHost {
            shared,
            network: self.clone(),
        }
    }

    fn lookup(&self, peer: &PeerId) -> Option<Arc<HostShared>> {
        self.hosts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(peer)
            .and_then(Weak::upgrade)
    }
}

pub struct MemoryHost {
    shared: Arc<HostShared>,
    network: Arc<MemoryNetwork>,
}

impl Host for MemoryHost {
    fn local_peer(&self) -> PeerId {
        self.shared.peer
    }

    fn set_stream_handler(&self, protocol: &str, handler: StreamHandler) {
        self.shared
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(protocol.to_owned(), handler);
    }

    fn remove_stream_handler(&self, protocol: &str) {
        self.shared
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(protocol);
    }

    async fn new_stream(&self, peer: PeerId, protocol: &str) -> io::Result<Stream> {
        let target = self.network.lookup(&peer).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("peer {peer} unreachable"),
            )
        })?;
        let handler = target.handler(protocol).ok_or_else(|| unsupported(protocol))?;
        let (local, remote) = pipe();
        debug!(from = %self.shared.peer, to = %peer, %protocol, "memory stream opened");
        tokio::spawn(handler(Stream::new(remote, self.shared.peer, protocol)));
        Ok(Stream::new(local, peer, protocol))
    }
}

impl Drop for MemoryHost {
    fn drop(&mut self) {
        let mut hosts = self
            .network
            .hosts
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        // a later host with the same identity may have taken the slot
        let ours = Arc::downgrade(&self.shared);
        if hosts
            .get(&self.shared.peer)
            .is_some_and(|entry| Weak::ptr_eq(entry, &ours))
        {
            hosts.remove(&self.shared.peer);
        }
    }
}
