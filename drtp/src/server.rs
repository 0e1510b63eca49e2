//! Receiving side: one bound socket, one task per connection.
//!
//! # Architecture
//!
//! ```text
//!            ┌──────────────────────────── Server::run ───┐
//!  datagram  │  decode → look up peer → inbox (mpsc)       │
//!  ─────────▶│     │ unknown peer + SYN: spawn task        │
//!            │     │ unknown peer + FIN: stateless ACK     │
//!            └─────┼───────────────────────────────────────┘
//!                  ▼
//!       ConnectionTask (per peer): Receiver + sink + Arc<channel>
//! ```
//!
//! Each task exclusively owns its [`Receiver`] and its sink; the only thing
//! shared is the socket, and sending on it needs `&self` only.  The peer
//! entry disappears when the task ends (FIN, idle timeout, error).
//!
//! Whatever ends a task, its sink is flushed and shut down before the task
//! reports back.  Bytes delivered before a failure stay in the sink.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinSet;
use tokio::time::timeout;

use crate::config::Config;
use crate::error::{DrtpError, Result};
use crate::packet::{Header, Packet};
use crate::receiver::{ack_header, ReceiveReport, Receiver, Verdict};
use crate::socket::Channel;

/// Segments queued per connection before further ones are dropped.
const INBOX_DEPTH: usize = 64;

/// How one connection ended.
pub type ConnectionOutcome = (SocketAddr, Result<ReceiveReport>);

/// A DRTP receiver serving any number of peers concurrently.
///
/// `make_sink` is called once per connection, on its first SYN, to open the
/// byte sink that connection writes into.
pub struct Server<C, F> {
    channel: Arc<C>,
    config: Config,
    make_sink: Arc<F>,
    limit: Option<usize>,
}

impl<C, F, Fut, W> Server<C, F>
where
    C: Channel + Send + Sync + 'static,
    F: Fn(SocketAddr) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = io::Result<W>> + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(channel: C, config: Config, make_sink: F) -> Self {
        Self {
            channel: Arc::new(channel),
            config,
            make_sink: Arc::new(make_sink),
            limit: None,
        }
    }

    /// Stop serving once `n` connections have ended.
    pub fn with_connection_limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.channel.local_addr()
    }

    /// Serve until `shutdown` resolves, the connection limit is reached, or
    /// the channel fails.
    ///
    /// On shutdown every live connection is told to stop; it flushes its
    /// sink and reports [`DrtpError::Cancelled`].  The outcomes of all
    /// connections that ended are returned in completion order.
    pub async fn run<S>(self, shutdown: S) -> Result<Vec<ConnectionOutcome>>
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut inboxes: HashMap<SocketAddr, mpsc::Sender<Packet>> = HashMap::new();
        let mut tasks: JoinSet<ConnectionOutcome> = JoinSet::new();
        let mut finished = Vec::new();

        info!("listening on {}", self.local_addr().map_err(DrtpError::Channel)?);

        let result = loop {
            if self.limit.is_some_and(|limit| finished.len() >= limit) {
                break Ok(());
            }

            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested; closing {} connection(s)", inboxes.len());
                    break Ok(());
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Some(outcome) = reap(joined) {
                        inboxes.remove(&outcome.0);
                        finished.push(outcome);
                    }
                }
                received = self.channel.recv_from() => {
                    let (bytes, from) = match received {
                        Ok(v) => v,
                        Err(e) => break Err(DrtpError::Channel(e)),
                    };
                    match Packet::decode(&bytes) {
                        Ok(packet) => self.dispatch(from, packet, &mut inboxes, &mut tasks).await,
                        Err(e) => debug!("dropping datagram from {from}: {e}"),
                    }
                }
            }
        };

        // Closing the inboxes tells every live task to wind down.
        inboxes.clear();
        while let Some(joined) = tasks.join_next().await {
            if let Some(outcome) = reap(joined) {
                finished.push(outcome);
            }
        }
        result.map(|()| finished)
    }

    async fn dispatch(
        &self,
        from: SocketAddr,
        mut packet: Packet,
        inboxes: &mut HashMap<SocketAddr, mpsc::Sender<Packet>>,
        tasks: &mut JoinSet<ConnectionOutcome>,
    ) {
        if let Some(inbox) = inboxes.get(&from) {
            match inbox.try_send(packet) {
                Ok(()) => return,
                Err(TrySendError::Full(_)) => {
                    debug!("inbox for {from} full; dropping segment");
                    return;
                }
                Err(TrySendError::Closed(p)) => {
                    inboxes.remove(&from);
                    packet = p;
                }
            }
        }

        let header = packet.header;
        if header.is_syn() {
            info!("new connection from {from}");
            let (tx, rx) = mpsc::channel(INBOX_DEPTH);
            if let Err(e) = tx.try_send(packet) {
                warn!("could not queue SYN from {from}: {e}");
                return;
            }
            inboxes.insert(from, tx);
            tasks.spawn(serve_connection(
                Arc::clone(&self.channel),
                from,
                rx,
                Arc::clone(&self.make_sink),
                self.config.idle_timeout,
            ));
        } else if header.is_fin() {
            // The connection already ended and our ACK of its FIN was lost.
            let ack = Packet {
                header: ack_header(header.seq),
                payload: Vec::new(),
            };
            if let Err(e) = self.channel.send_to(&ack, from).await {
                warn!("failed to re-ACK FIN from {from}: {e}");
            }
        } else {
            debug!("no connection for {from}; dropping seq={}", header.seq);
        }
    }
}

fn reap(
    joined: std::result::Result<ConnectionOutcome, tokio::task::JoinError>,
) -> Option<ConnectionOutcome> {
    match joined {
        Ok((peer, outcome)) => {
            match &outcome {
                Ok(report) => info!(
                    "connection from {peer} complete: {} bytes, {} segments, {} duplicates",
                    report.bytes, report.segments, report.duplicates
                ),
                Err(e) => warn!("connection from {peer} failed: {e}"),
            }
            Some((peer, outcome))
        }
        Err(e) => {
            warn!("connection task aborted: {e}");
            None
        }
    }
}

async fn serve_connection<C, F, Fut, W>(
    channel: Arc<C>,
    peer: SocketAddr,
    mut inbox: mpsc::Receiver<Packet>,
    make_sink: Arc<F>,
    idle: Duration,
) -> ConnectionOutcome
where
    C: Channel + Send + Sync,
    F: Fn(SocketAddr) -> Fut,
    Fut: Future<Output = io::Result<W>>,
    W: AsyncWrite + Unpin,
{
    let mut task = ConnectionTask {
        channel,
        peer,
        receiver: Receiver::new(),
        sink: None,
    };
    let result = task.run(&mut inbox, &*make_sink, idle).await;
    // Later segments from this peer take the stateless path in `dispatch`.
    inbox.close();
    let result = task.release(result).await;
    (peer, result)
}

/// Send a payload-less reply.  Borrows only the channel, so the future
/// stays `Send` whatever the sink type.
async fn reply_to<C: Channel>(channel: &C, peer: SocketAddr, header: Header) -> Result<()> {
    let packet = Packet {
        header,
        payload: Vec::new(),
    };
    channel
        .send_to(&packet, peer)
        .await
        .map_err(DrtpError::Channel)
}

/// State owned by one connection's task.
struct ConnectionTask<C, W> {
    channel: Arc<C>,
    peer: SocketAddr,
    receiver: Receiver,
    sink: Option<W>,
}

impl<C, W> ConnectionTask<C, W>
where
    C: Channel + Send + Sync,
    W: AsyncWrite + Unpin,
{
    async fn run<F, Fut>(
        &mut self,
        inbox: &mut mpsc::Receiver<Packet>,
        make_sink: &F,
        idle: Duration,
    ) -> Result<ReceiveReport>
    where
        F: Fn(SocketAddr) -> Fut,
        Fut: Future<Output = io::Result<W>>,
    {
        loop {
            let packet = match timeout(idle, inbox.recv()).await {
                Ok(Some(packet)) => packet,
                Ok(None) => return Err(DrtpError::Cancelled),
                Err(_) => {
                    return Err(DrtpError::PeerIdle {
                        peer: self.peer,
                        idle,
                    })
                }
            };

            match self.receiver.on_packet(&packet) {
                Verdict::Ignore => {}
                Verdict::Open(reply) => {
                    let sink = make_sink(self.peer).await.map_err(DrtpError::Stream)?;
                    self.sink = Some(sink);
                    reply_to(&self.channel, self.peer, reply).await?;
                }
                Verdict::Deliver(reply) => {
                    let Some(sink) = self.sink.as_mut() else {
                        return Err(DrtpError::BadState {
                            op: "deliver data",
                            state: "without an open sink".into(),
                        });
                    };
                    sink.write_all(&packet.payload)
                        .await
                        .map_err(DrtpError::Stream)?;
                    debug!(
                        "← DATA seq={} len={} from {}",
                        packet.header.seq,
                        packet.payload.len(),
                        self.peer
                    );
                    reply_to(&self.channel, self.peer, reply).await?;
                }
                Verdict::Reply(reply) => reply_to(&self.channel, self.peer, reply).await?,
                Verdict::Finish(reply) => {
                    self.close_sink().await.map_err(DrtpError::Stream)?;
                    reply_to(&self.channel, self.peer, reply).await?;
                    debug!("← FIN from {}; connection closed", self.peer);
                    return Ok(self.receiver.report());
                }
            }
        }
    }

    async fn close_sink(&mut self) -> io::Result<()> {
        if let Some(mut sink) = self.sink.take() {
            sink.flush().await?;
            sink.shutdown().await?;
        }
        Ok(())
    }

    /// Flush and close the sink on every exit path.
    async fn release(&mut self, result: Result<ReceiveReport>) -> Result<ReceiveReport> {
        match (self.close_sink().await, result) {
            (Err(e), Ok(_)) => Err(DrtpError::Stream(e)),
            (Err(e), Err(original)) => {
                warn!("closing sink for {} after failure: {e}", self.peer);
                Err(original)
            }
            (Ok(()), result) => result,
        }
    }
}
