//! TCP transport: one connection per stream. Authenticated handshake (version + peer id
//! + public key, then key confirmation over the X25519 session key), then protocol
//! negotiation: the opener sends the protocol id, the acceptor echoes it or answers `na`.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use fetch_core::identity::{derive_session_key, handshake_proof};
use fetch_core::wire::{decode_payload, encode_frame, frame_len, LEN_SIZE};
use fetch_core::{Keypair, PeerId, PublicKey};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, info_span, warn, Instrument};

use super::{unsupported, Host, StreamHandler};
use crate::ctx::Ctx;
use crate::stream::{RawStream, Stream};

/// Handshake format version; a mismatch aborts the connection.
pub const TRANSPORT_VERSION: u8 = 1;

const HANDSHAKE_SIZE: usize = 1 + 16 + 32; // version + peer_id + public_key
const PROOF_SIZE: usize = 32;
const MAX_PROTOCOL_LEN: usize = 1024;
const NA: &str = "na";

/// Bounds handshake and negotiation on accepted connections.
pub const NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(10);

impl RawStream for TcpStream {
    #[allow(deprecated)]
    fn abort(self: Box<Self>) {
        // linger 0: close sends RST instead of FIN
        let _ = self.set_linger(Some(Duration::ZERO));
    }
}

/// `<peer-id>@<host:port>`, as accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddr {
    pub peer: PeerId,
    pub addr: SocketAddr,
}

#[derive(Debug, thiserror::Error)]
pub enum ParsePeerAddrError {
    #[error("expected <peer-id>@<host:port>")]
    Format,
    #[error(transparent)]
    PeerId(#[from] fetch_core::identity::ParsePeerIdError),
    #[error("invalid socket address: {0}")]
    Addr(#[from] std::net::AddrParseError),
}

impl FromStr for PeerAddr {
    type Err = ParsePeerAddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (peer, addr) = s.split_once('@').ok_or(ParsePeerAddrError::Format)?;
        Ok(PeerAddr {
            peer: peer.parse()?,
            addr: addr.parse()?,
        })
    }
}

pub struct TcpHost {
    keypair: Keypair,
    handlers: RwLock<HashMap<String, StreamHandler>>,
    addrs: RwLock<HashMap<PeerId, SocketAddr>>,
}

impl TcpHost {
    pub fn new(keypair: Keypair) -> Self {
        Self {
            keypair,
            handlers: RwLock::new(HashMap::new()),
            addrs: RwLock::new(HashMap::new()),
        }
    }

    /// Where to dial `peer`. Replaces a previously known address.
    pub fn add_address(&self, peer: PeerId, addr: SocketAddr) {
        self.addrs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(peer, addr);
    }

    fn address(&self, peer: &PeerId) -> Option<SocketAddr> {
        self.addrs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(peer)
            .copied()
    }

    fn handler(&self, protocol: &str) -> Option<StreamHandler> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(protocol)
            .cloned()
    }

    /// Bind `addr` and accept connections until `ctx` ends. Returns the bound address.
    pub async fn listen(self: &Arc<Self>, addr: SocketAddr, ctx: Ctx) -> io::Result<SocketAddr> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        info!(addr = %local, peer = %self.local_peer(), "listening");

        let host = Arc::clone(self);
        let span = info_span!("tcp_listener", addr = %local);
        tokio::spawn(
            async move {
                loop {
                    tokio::select! {
                        err = ctx.done() => {
                            info!(%err, "listener shutting down");
                            break;
                        }
                        accepted = listener.accept() => match accepted {
                            Ok((tcp, from)) => {
                                let host = host.clone();
                                tokio::spawn(async move {
                                    if let Err(err) = host.accept_inbound(tcp).await {
                                        debug!(%from, %err, "inbound connection rejected");
                                    }
                                });
                            }
                            Err(err) => warn!(%err, "accept failed"),
                        }
                    }
                }
            }
            .instrument(span),
        );
        Ok(local)
    }

    async fn accept_inbound(&self, mut tcp: TcpStream) -> io::Result<()> {
        tcp.set_nodelay(true)?;
        let (peer, protocol) = tokio::time::timeout(NEGOTIATION_TIMEOUT, async {
            let peer = handshake(&mut tcp, &self.keypair).await?;
            let protocol = read_token(&mut tcp).await?;
            Ok::<_, io::Error>((peer, protocol))
        })
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "negotiation timed out"))??;

        let Some(handler) = self.handler(&protocol) else {
            write_token(&mut tcp, NA).await?;
            return Err(unsupported(&protocol));
        };
        write_token(&mut tcp, &protocol).await?;
        debug!(%peer, %protocol, "inbound stream");
        handler(Stream::new(tcp, peer, protocol)).await;
        Ok(())
    }
}

impl Host for TcpHost {
    fn local_peer(&self) -> PeerId {
        self.keypair.peer_id()
    }

    fn set_stream_handler(&self, protocol: &str, handler: StreamHandler) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(protocol.to_owned(), handler);
    }

    fn remove_stream_handler(&self, protocol: &str) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(protocol);
    }

    async fn new_stream(&self, peer: PeerId, protocol: &str) -> io::Result<Stream> {
        let addr = self.address(&peer).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no address known for peer {peer}"),
            )
        })?;
        let mut tcp = TcpStream::connect(addr).await?;
        tcp.set_nodelay(true)?;
        let remote = handshake(&mut tcp, &self.keypair).await?;
        if remote != peer {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("dialed {peer} at {addr}, reached {remote}"),
            ));
        }
        write_token(&mut tcp, protocol).await?;
        if read_token(&mut tcp).await? != protocol {
            return Err(unsupported(protocol));
        }
        Ok(Stream::new(tcp, peer, protocol))
    }
}

/// Symmetric: both sides send their hello, then their proof. Returns the verified remote id.
async fn handshake(tcp: &mut TcpStream, keypair: &Keypair) -> io::Result<PeerId> {
    tcp.write_all(&handshake_bytes(keypair)).await?;
    tcp.flush().await?;

    let mut buf = [0u8; HANDSHAKE_SIZE];
    tcp.read_exact(&mut buf).await?;
    if buf[0] != TRANSPORT_VERSION {
        return Err(invalid("unsupported transport version"));
    }
    let mut public_key = [0u8; 32];
    public_key.copy_from_slice(&buf[17..49]);
    let peer_public = PublicKey::from_bytes(public_key);
    let peer_id = PeerId::from_public_key(peer_public.as_bytes());
    if peer_id.as_bytes()[..] != buf[1..17] {
        return Err(invalid("peer id does not match public key"));
    }

    let session_key = derive_session_key(&keypair.shared_secret(&peer_public));
    tcp.write_all(&handshake_proof(&session_key, keypair.public_key()))
        .await?;
    tcp.flush().await?;
    let mut proof = [0u8; PROOF_SIZE];
    tcp.read_exact(&mut proof).await?;
    if proof != handshake_proof(&session_key, &peer_public) {
        return Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "peer failed key confirmation",
        ));
    }
    Ok(peer_id)
}

fn handshake_bytes(keypair: &Keypair) -> [u8; HANDSHAKE_SIZE] {
    let mut out = [0u8; HANDSHAKE_SIZE];
    out[0] = TRANSPORT_VERSION;
    out[1..17].copy_from_slice(keypair.peer_id().as_bytes());
    out[17..49].copy_from_slice(keypair.public_key().as_bytes());
    out
}

async fn write_token(tcp: &mut TcpStream, token: &str) -> io::Result<()> {
    let frame = encode_frame(token, MAX_PROTOCOL_LEN).map_err(|e| invalid(&e.to_string()))?;
    tcp.write_all(&frame).await?;
    tcp.flush().await
}

async fn read_token(tcp: &mut TcpStream) -> io::Result<String> {
    let mut prefix = [0u8; LEN_SIZE];
    tcp.read_exact(&mut prefix).await?;
    let len = frame_len(prefix, MAX_PROTOCOL_LEN).map_err(|e| invalid(&e.to_string()))?;
    let mut body = vec![0u8; len];
    tcp.read_exact(&mut body).await?;
    decode_payload(&body).map_err(|e| invalid(&e.to_string()))
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_owned())
}
