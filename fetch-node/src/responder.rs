//! Server side: one task per accepted stream, one request in, one response out.

use std::future::Future;
use std::sync::Arc;

use fetch_core::{Request, Response, FETCH_PROTOCOL_ID, MAX_MESSAGE_SIZE};
use tracing::{debug, debug_span, info, Instrument};

use crate::ctx::Ctx;
use crate::error::FetchError;
use crate::framing::{read_framed, write_framed};
use crate::stream::Stream;
use crate::transport::{stream_handler, BoxFuture, Host};

/// Key lookup injected into the responder. Any error means "not found" to the peer;
/// the reason never crosses the wire. Called concurrently from every open stream.
pub type GetValue = Arc<dyn Fn(Ctx, String) -> BoxFuture<anyhow::Result<Vec<u8>>> + Send + Sync>;

/// Build a [`GetValue`] from an async closure.
pub fn get_value_fn<F, Fut>(f: F) -> GetValue
where
    F: Fn(Ctx, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Vec<u8>>> + Send + 'static,
{
    Arc::new(move |ctx, key| -> BoxFuture<anyhow::Result<Vec<u8>>> { Box::pin(f(ctx, key)) })
}

#[derive(Clone)]
pub struct Responder {
    get_value: GetValue,
    max_message_size: usize,
}

impl Responder {
    pub fn new(get_value: GetValue) -> Self {
        Self {
            get_value,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }

    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    /// Register as the fetch protocol handler on `host`. Every stream is served with
    /// `ctx`: cancelling it aborts requests still being read.
    pub fn serve<H: Host>(self, host: &H, ctx: Ctx) {
        let responder = Arc::new(self);
        host.set_stream_handler(
            FETCH_PROTOCOL_ID,
            stream_handler(move |stream: Stream| {
                let responder = responder.clone();
                let ctx = ctx.clone();
                let span = debug_span!("fetch_receive", peer = %stream.remote_peer());
                async move {
                    if let Err(err) = responder.receive(&ctx, stream).await {
                        debug!(%err, "exchange failed");
                    }
                }
                .instrument(span)
            }),
        );
    }

    /// Serve a single exchange on an accepted stream. The stream is always released:
    /// closed gracefully after the response, reset on any failure.
    pub async fn receive(&self, ctx: &Ctx, mut stream: Stream) -> Result<(), FetchError> {
        let request: Request = match read_framed(ctx, &mut stream, self.max_message_size).await {
            Ok(request) => request,
            Err(err) => {
                info!(peer = %stream.remote_peer(), %err, "error reading request");
                return Err(err);
            }
        };

        let key = request.identifier;
        let response = match (self.get_value)(ctx.clone(), key.clone()).await {
            Ok(data) => Response::found(data),
            Err(err) => {
                debug!(%key, %err, "lookup failed, answering not found");
                Response::not_found()
            }
        };

        write_framed(ctx, &mut stream, &response, self.max_message_size).await?;
        stream.close(ctx).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::pipe;
    use fetch_core::{Keypair, Status};

    fn pair() -> (Stream, Stream) {
        let (a, b) = pipe();
        let pa = Keypair::generate().peer_id();
        let pb = Keypair::generate().peer_id();
        (Stream::new(a, pb, FETCH_PROTOCOL_ID), Stream::new(b, pa, FETCH_PROTOCOL_ID))
    }

    fn responder() -> Responder {
        Responder::new(get_value_fn(|_ctx, key: String| async move {
            match key.as_str() {
                "bar" => Ok(b"hello".to_vec()),
                _ => anyhow::bail!("not found: {key}"),
            }
        }))
    }

    async fn exchange(key: &str) -> Response {
        let ctx = Ctx::background();
        let (mut client, server) = pair();
        let serving = tokio::spawn(async move {
            let ctx = Ctx::background();
            responder().receive(&ctx, server).await
        });
        let req = Request {
            identifier: key.into(),
        };
        write_framed(&ctx, &mut client, &req, MAX_MESSAGE_SIZE)
            .await
            .unwrap();
        client.close_write().await.unwrap();
        let resp = read_framed(&ctx, &mut client, MAX_MESSAGE_SIZE).await.unwrap();
        client.close(&ctx).await.unwrap();
        serving.await.unwrap().unwrap();
        resp
    }

    #[tokio::test]
    async fn found_key_answers_ok() {
        let resp = exchange("bar").await;
        assert_eq!(resp.status, Status::Ok);
        assert_eq!(resp.data, b"hello");
    }

    #[tokio::test]
    async fn lookup_error_answers_not_found_without_reason() {
        let resp = exchange("foo").await;
        assert_eq!(resp.status, Status::NotFound);
        assert!(resp.data.is_empty());
    }

    #[tokio::test]
    async fn garbage_request_resets_without_response() {
        let (mut client, server) = pair();
        client.write_all(&3u32.to_le_bytes()).await.unwrap();
        client.write_all(&[9, 9, 9]).await.unwrap();
        let err = responder()
            .receive(&Ctx::background(), server)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
        let mut buf = [0u8; 1];
        let err = client.read_exact(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::ConnectionReset);
    }

    #[tokio::test]
    async fn cancelled_serve_ctx_aborts_pending_read() {
        let (_client, server) = pair();
        let ctx = Ctx::background();
        let serving = {
            let ctx = ctx.clone();
            tokio::spawn(async move { responder().receive(&ctx, server).await })
        };
        ctx.cancel();
        let err = serving.await.unwrap().unwrap_err();
        assert!(matches!(err, FetchError::Cancelled));
    }
}
