//! Stream transports. A [`Host`] dispatches inbound streams to per-protocol handlers
//! and opens outbound streams to peers; the fetch protocol only sees [`Stream`]s.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;

use fetch_core::PeerId;

use crate::stream::Stream;

pub mod memory;
pub mod tcp;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Called once per accepted stream. The handler owns the stream from then on.
pub type StreamHandler = Arc<dyn Fn(Stream) -> BoxFuture<()> + Send + Sync>;

pub trait Host: Send + Sync + 'static {
    fn local_peer(&self) -> PeerId;

    /// Replaces any handler already registered for `protocol`.
    fn set_stream_handler(&self, protocol: &str, handler: StreamHandler);

    fn remove_stream_handler(&self, protocol: &str);

    /// Open a stream to `peer` negotiated for `protocol`. Fails if the peer cannot be
    /// reached or has no handler for the protocol.
    fn new_stream(
        &self,
        peer: PeerId,
        protocol: &str,
    ) -> impl Future<Output = io::Result<Stream>> + Send;
}

/// Wrap an async closure as a [`StreamHandler`].
pub fn stream_handler<F, Fut>(f: F) -> StreamHandler
where
    F: Fn(Stream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |stream| -> BoxFuture<()> { Box::pin(f(stream)) })
}

fn unsupported(protocol: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        format!("protocol {protocol} not supported by peer"),
    )
}
