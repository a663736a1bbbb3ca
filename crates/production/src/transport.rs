//! Point-to-point validator transport.
//!
//! The consensus core only ever needs five operations against a peer:
//! multicast a message, broadcast a confirmed block, ping, exchange
//! status digests, and fetch a block range. [`Transport`] is that
//! narrow interface; [`TcpTransport`] implements it with one
//! length-prefixed TCP connection per call, and [`serve`] is the
//! answering side.
//!
//! Dialing policy, retries, and connection reuse are transport
//! concerns; the state machine never sees them - failures surface as
//! `PingFailed`/`BlockRangeFailed` events and the protocol retries on
//! a later tick.

use crate::codec::{
    decode_frame, encode_frame, BlockRangeRequest, CodecError, PingBody, PongBody, WireFrame,
};
use crate::runner::SharedState;
use palisade_core::Event;
use palisade_types::{
    CertifiedBlock, ConsensusMessage, LedgerStore, NodeStatus, SeqNumber, ValidatorIdentity,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Largest accepted frame (a full sync page of blocks fits comfortably).
const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

/// Transport-level failures.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("request timed out")]
    Timeout,

    #[error("peer answered with an unexpected frame")]
    UnexpectedFrame,

    #[error("frame of {0} bytes exceeds the limit")]
    FrameTooLarge(u32),
}

/// The five peer operations the consensus core consumes.
pub trait Transport: Send + Sync + 'static {
    /// Fire-and-forget delivery of one consensus message.
    fn send_message(
        &self,
        peer: &ValidatorIdentity,
        message: ConsensusMessage,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Fire-and-forget delivery of one confirmed block.
    fn send_block(
        &self,
        peer: &ValidatorIdentity,
        block: CertifiedBlock,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Ping with a nonce; resolves to the peer's pong.
    fn ping(
        &self,
        peer: &ValidatorIdentity,
        nonce: u64,
    ) -> impl Future<Output = Result<PongBody, TransportError>> + Send;

    /// Exchange status digests; resolves to the peer's digest.
    fn exchange_status(
        &self,
        peer: &ValidatorIdentity,
        status: NodeStatus,
    ) -> impl Future<Output = Result<NodeStatus, TransportError>> + Send;

    /// Fetch a page of confirmed blocks.
    fn get_block_range(
        &self,
        peer: &ValidatorIdentity,
        from: SeqNumber,
        count: usize,
    ) -> impl Future<Output = Result<Vec<CertifiedBlock>, TransportError>> + Send;
}

// ═══════════════════════════════════════════════════════════════════════════
// Framing
// ═══════════════════════════════════════════════════════════════════════════

async fn write_frame(stream: &mut TcpStream, frame: &WireFrame) -> Result<(), TransportError> {
    let bytes = encode_frame(frame)?;
    stream.write_u32(bytes.len() as u32).await?;
    stream.write_all(&bytes).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_frame(stream: &mut TcpStream) -> Result<WireFrame, TransportError> {
    let len = stream.read_u32().await?;
    if len > MAX_FRAME_BYTES {
        return Err(TransportError::FrameTooLarge(len));
    }
    let mut bytes = vec![0u8; len as usize];
    stream.read_exact(&mut bytes).await?;
    Ok(decode_frame(&bytes)?)
}

// ═══════════════════════════════════════════════════════════════════════════
// Client
// ═══════════════════════════════════════════════════════════════════════════

/// One-connection-per-call TCP transport.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    /// Budget for connect + request + response.
    request_timeout: Duration,
}

impl TcpTransport {
    /// Create a transport with the given per-request timeout.
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }

    async fn dial(&self, peer: &ValidatorIdentity) -> Result<TcpStream, TransportError> {
        let stream = TcpStream::connect((peer.host.as_str(), peer.port)).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    /// Send `frame`, optionally awaiting a response frame.
    async fn call(
        &self,
        peer: &ValidatorIdentity,
        frame: WireFrame,
        expects_reply: bool,
    ) -> Result<Option<WireFrame>, TransportError> {
        let work = async {
            let mut stream = self.dial(peer).await?;
            write_frame(&mut stream, &frame).await?;
            if !expects_reply {
                return Ok(None);
            }
            Ok(Some(read_frame(&mut stream).await?))
        };
        tokio::time::timeout(self.request_timeout, work)
            .await
            .map_err(|_| TransportError::Timeout)?
    }
}

impl Transport for TcpTransport {
    fn send_message(
        &self,
        peer: &ValidatorIdentity,
        message: ConsensusMessage,
    ) -> impl Future<Output = Result<(), TransportError>> + Send {
        async move {
            self.call(peer, WireFrame::Message(message), false).await?;
            Ok(())
        }
    }

    fn send_block(
        &self,
        peer: &ValidatorIdentity,
        block: CertifiedBlock,
    ) -> impl Future<Output = Result<(), TransportError>> + Send {
        async move {
            self.call(peer, WireFrame::Block(Box::new(block)), false)
                .await?;
            Ok(())
        }
    }

    fn ping(
        &self,
        peer: &ValidatorIdentity,
        nonce: u64,
    ) -> impl Future<Output = Result<PongBody, TransportError>> + Send {
        async move {
            match self.call(peer, WireFrame::Ping(PingBody { nonce }), true).await? {
                Some(WireFrame::Pong(body)) if body.nonce == nonce => Ok(body),
                _ => Err(TransportError::UnexpectedFrame),
            }
        }
    }

    fn exchange_status(
        &self,
        peer: &ValidatorIdentity,
        status: NodeStatus,
    ) -> impl Future<Output = Result<NodeStatus, TransportError>> + Send {
        async move {
            match self
                .call(peer, WireFrame::StatusRequest(Box::new(status)), true)
                .await?
            {
                Some(WireFrame::StatusReply(reply)) => Ok(*reply),
                _ => Err(TransportError::UnexpectedFrame),
            }
        }
    }

    fn get_block_range(
        &self,
        peer: &ValidatorIdentity,
        from: SeqNumber,
        count: usize,
    ) -> impl Future<Output = Result<Vec<CertifiedBlock>, TransportError>> + Send {
        async move {
            let request = WireFrame::GetBlockRange(BlockRangeRequest {
                from,
                count: count as u32,
            });
            match self.call(peer, request, true).await? {
                Some(WireFrame::BlockRange(blocks)) => Ok(blocks),
                _ => Err(TransportError::UnexpectedFrame),
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Server
// ═══════════════════════════════════════════════════════════════════════════

/// State the answering side needs.
#[derive(Clone)]
pub struct ServerContext {
    /// Inbound events for the runner.
    pub event_tx: mpsc::Sender<Event>,
    /// Ledger store for sync requests.
    pub store: Arc<dyn LedgerStore>,
    /// Caches refreshed by the runner (status digest replies).
    pub shared: Arc<SharedState>,
}

/// Accept loop: one task per inbound connection.
pub async fn serve(listener: TcpListener, ctx: ServerContext) {
    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                trace!(%remote, "Inbound connection");
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(error) = handle_connection(stream, ctx).await {
                        debug!(%remote, %error, "Connection handling failed");
                    }
                });
            }
            Err(error) => {
                warn!(%error, "Accept failed");
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    ctx: ServerContext,
) -> Result<(), TransportError> {
    match read_frame(&mut stream).await? {
        WireFrame::Message(message) => {
            let _ = ctx.event_tx.send(Event::MessageReceived { message }).await;
        }
        WireFrame::Block(block) => {
            let _ = ctx
                .event_tx
                .send(Event::CertifiedBlockReceived { block: *block })
                .await;
        }
        WireFrame::Ping(PingBody { nonce }) => {
            let pong = WireFrame::Pong(PongBody {
                nonce,
                timestamp: ctx.shared.timestamp_millis(),
            });
            write_frame(&mut stream, &pong).await?;
        }
        WireFrame::StatusRequest(status) => {
            // The requester's digest feeds our health monitor; ours goes
            // back as the reply.
            let reply = WireFrame::StatusReply(Box::new(ctx.shared.status()));
            let _ = ctx
                .event_tx
                .send(Event::StatusReceived {
                    peer: status.signer,
                    status: *status,
                })
                .await;
            write_frame(&mut stream, &reply).await?;
        }
        WireFrame::GetBlockRange(request) => {
            let blocks = ctx
                .store
                .block_range(request.from, request.count as usize);
            write_frame(&mut stream, &WireFrame::BlockRange(blocks)).await?;
        }
        frame => {
            warn!(?frame, "Unexpected inbound frame");
        }
    }
    Ok(())
}
