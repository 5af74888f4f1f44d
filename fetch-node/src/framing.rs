//! Framed message I/O on a [`Stream`], raced against a [`Ctx`].
//!
//! Whichever finishes first wins: the I/O or the context ending. A losing I/O future
//! is dropped, and on any failure the stream is reset so the peer sees an abort
//! instead of a truncated, valid-looking message.

use fetch_core::wire::{decode_payload, encode_frame, frame_len, LEN_SIZE};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::ctx::Ctx;
use crate::error::FetchError;
use crate::stream::Stream;

pub async fn write_framed<T: Serialize + ?Sized>(
    ctx: &Ctx,
    stream: &mut Stream,
    msg: &T,
    max_size: usize,
) -> Result<(), FetchError> {
    let result = match encode_frame(msg, max_size) {
        Ok(frame) => tokio::select! {
            biased;
            err = ctx.done() => Err(err),
            res = stream.write_all(&frame) => res.map_err(FetchError::from),
        },
        Err(e) => Err(e.into()),
    };
    if let Err(err) = &result {
        debug!(peer = %stream.remote_peer(), %err, "error writing message");
        stream.reset();
    }
    result
}

/// Read one frame, rejecting a declared length above `max_size` before reading the body.
pub async fn read_framed<T: DeserializeOwned>(
    ctx: &Ctx,
    stream: &mut Stream,
    max_size: usize,
) -> Result<T, FetchError> {
    let result = tokio::select! {
        biased;
        err = ctx.done() => Err(err),
        res = read_frame(stream, max_size) => res,
    };
    if let Err(err) = &result {
        debug!(peer = %stream.remote_peer(), %err, "error reading message");
        stream.reset();
    }
    result
}

async fn read_frame<T: DeserializeOwned>(
    stream: &mut Stream,
    max_size: usize,
) -> Result<T, FetchError> {
    let mut prefix = [0u8; LEN_SIZE];
    stream.read_exact(&mut prefix).await?;
    let len = frame_len(prefix, max_size)?;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    Ok(decode_payload(&payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::pipe;
    use fetch_core::{Keypair, Request, Response, Status, MAX_MESSAGE_SIZE};
    use std::io;
    use std::time::{Duration, Instant};

    fn pair() -> (Stream, Stream) {
        let (a, b) = pipe();
        let pa = Keypair::generate().peer_id();
        let pb = Keypair::generate().peer_id();
        (Stream::new(a, pb, "/test"), Stream::new(b, pa, "/test"))
    }

    async fn assert_peer_reset(stream: &mut Stream) {
        let mut buf = [0u8; 1];
        let err = stream.read_exact(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[tokio::test]
    async fn request_and_response_roundtrip() {
        let ctx = Ctx::background();
        let (mut a, mut b) = pair();
        let req = Request {
            identifier: "bar".into(),
        };
        write_framed(&ctx, &mut a, &req, MAX_MESSAGE_SIZE)
            .await
            .unwrap();
        let got: Request = read_framed(&ctx, &mut b, MAX_MESSAGE_SIZE).await.unwrap();
        assert_eq!(got, req);

        let resp = Response {
            status: Status::Unknown(99),
            data: b"?".to_vec(),
        };
        write_framed(&ctx, &mut b, &resp, MAX_MESSAGE_SIZE)
            .await
            .unwrap();
        let got: Response = read_framed(&ctx, &mut a, MAX_MESSAGE_SIZE).await.unwrap();
        assert_eq!(got, resp);
    }

    #[tokio::test]
    async fn oversize_declared_length_rejected() {
        let ctx = Ctx::background();
        let (mut a, mut b) = pair();
        // prefix only: the reader must not wait for (or allocate) the body
        let declared = (MAX_MESSAGE_SIZE + 1) as u32;
        a.write_all(&declared.to_le_bytes()).await.unwrap();
        let err = read_framed::<Request>(&ctx, &mut b, MAX_MESSAGE_SIZE)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Oversize { size, max } if size == MAX_MESSAGE_SIZE + 1 && max == MAX_MESSAGE_SIZE));
        assert!(!b.is_open());
        assert_peer_reset(&mut a).await;
    }

    #[tokio::test]
    async fn oversize_write_resets() {
        let ctx = Ctx::background();
        let (mut a, mut b) = pair();
        let err = write_framed(&ctx, &mut a, &Response::found(vec![0; 64]), 16)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Oversize { .. }));
        assert!(!a.is_open());
        assert_peer_reset(&mut b).await;
    }

    #[tokio::test]
    async fn truncated_frame_is_io_error() {
        let ctx = Ctx::background();
        let (mut a, mut b) = pair();
        a.write_all(&10u32.to_le_bytes()).await.unwrap();
        a.write_all(&[1, 2, 3]).await.unwrap();
        a.close_write().await.unwrap();
        let err = read_framed::<Request>(&ctx, &mut b, MAX_MESSAGE_SIZE)
            .await
            .unwrap_err();
        match err {
            FetchError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected io error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_payload_is_decode_error() {
        let ctx = Ctx::background();
        let (mut a, mut b) = pair();
        a.write_all(&2u32.to_le_bytes()).await.unwrap();
        a.write_all(&[0xff, 0xff]).await.unwrap();
        let err = read_framed::<Request>(&ctx, &mut b, MAX_MESSAGE_SIZE)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
        assert_peer_reset(&mut a).await;
    }

    #[tokio::test]
    async fn cancelled_read_returns_promptly_and_resets() {
        let ctx = Ctx::background();
        let (mut a, mut b) = pair();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let started = Instant::now();
        let err = read_framed::<Response>(&ctx, &mut b, MAX_MESSAGE_SIZE)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!b.is_open());
        assert_peer_reset(&mut a).await;
    }

    #[tokio::test]
    async fn deadline_on_read() {
        let ctx = Ctx::background().with_timeout(Duration::from_millis(10));
        let (_a, mut b) = pair();
        let err = read_framed::<Response>(&ctx, &mut b, MAX_MESSAGE_SIZE)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn already_cancelled_write_does_nothing() {
        let ctx = Ctx::background();
        ctx.cancel();
        let (mut a, mut b) = pair();
        let err = write_framed(&ctx, &mut a, &Request { identifier: "x".into() }, MAX_MESSAGE_SIZE)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Cancelled));
        assert_peer_reset(&mut b).await;
    }
}
