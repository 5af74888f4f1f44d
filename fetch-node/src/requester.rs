//! Client side: open a stream, send one request, half-close, read one response.

use std::sync::Arc;
use std::time::Duration;

use fetch_core::{PeerId, Request, Response, Status, FETCH_PROTOCOL_ID, MAX_MESSAGE_SIZE};
use tracing::debug;

use crate::ctx::Ctx;
use crate::error::FetchError;
use crate::framing::{read_framed, write_framed};
use crate::transport::Host;

/// Ceiling for a whole exchange, stream setup included.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Fetcher<H> {
    host: Arc<H>,
    timeout: Duration,
    max_message_size: usize,
}

impl<H: Host> Fetcher<H> {
    pub fn new(host: Arc<H>) -> Self {
        Self {
            host,
            timeout: FETCH_TIMEOUT,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    /// Ask `peer` for `key`. `Ok(None)` means the peer answered not-found; that is not
    /// an error. Nothing is retried here.
    pub async fn fetch(
        &self,
        ctx: &Ctx,
        peer: PeerId,
        key: &str,
    ) -> Result<Option<Vec<u8>>, FetchError> {
        let ctx = ctx.with_timeout(self.timeout);

        let mut stream = tokio::select! {
            biased;
            err = ctx.done() => return Err(err),
            res = self.host.new_stream(peer, FETCH_PROTOCOL_ID) => res.map_err(FetchError::Connect)?,
        };

        let request = Request {
            identifier: key.to_owned(),
        };
        write_framed(&ctx, &mut stream, &request, self.max_message_size).await?;

        // half-close: the responder sees the request is complete
        let half_closed = tokio::select! {
            biased;
            err = ctx.done() => Err(err),
            res = stream.close_write() => res.map_err(FetchError::from),
        };
        if let Err(err) = half_closed {
            stream.reset();
            return Err(err);
        }

        let response: Response = read_framed(&ctx, &mut stream, self.max_message_size).await?;
        // the response is complete; a peer that never finishes closing only costs a reset
        if let Err(err) = stream.close(&ctx).await {
            debug!(%peer, %err, "closing fetch stream");
        }

        match response.status {
            Status::Ok => Ok(Some(response.data)),
            Status::NotFound => Ok(None),
            Status::Unknown(code) => Err(FetchError::UnknownStatus(code)),
        }
    }
}
