//! PeaFetch over tokio: single request/response exchanges on per-exchange streams.
//!
//! A [`Responder`] registered on a [`Host`] answers one [`fetch_core::Request`] per
//! inbound stream from an injected [`GetValue`]; a [`Fetcher`] opens a stream to a
//! peer, sends the request, half-closes and reads the [`fetch_core::Response`].

pub mod config;
pub mod ctx;
pub mod error;
pub mod framing;
pub mod requester;
pub mod responder;
pub mod store;
pub mod stream;
pub mod transport;

pub use ctx::Ctx;
pub use error::FetchError;
pub use requester::{Fetcher, FETCH_TIMEOUT};
pub use responder::{get_value_fn, GetValue, Responder};
pub use stream::Stream;
pub use transport::memory::{MemoryHost, MemoryNetwork};
pub use transport::tcp::{PeerAddr, TcpHost};
pub use transport::Host;
