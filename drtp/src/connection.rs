//! Sending side of a transfer: handshake, stop-and-wait data loop, teardown.
//!
//! A [`Connection`] owns everything for one outbound transfer: the channel,
//! the peer address, the [`Sender`] state machine and its retransmission
//! timer.  Nothing is shared with other connections.
//!
//! ```ignore
//! let mut conn = Connection::connect(socket, peer, &config).await?;
//! conn.send_stream(&mut file).await?;
//! let report = conn.close().await?;
//! ```
//!
//! Every wait is bounded by the retransmission timer.  Dropping a
//! `Connection` (for example when a shutdown signal wins a `select!`)
//! releases the socket immediately, whatever state it was in.

use std::io;
use std::net::SocketAddr;

use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout_at;

use crate::config::Config;
use crate::error::{DrtpError, Result};
use crate::packet::{Header, Packet, MAX_PAYLOAD};
use crate::sender::{AckOutcome, Sender};
use crate::socket::Channel;
use crate::state::SenderState;
use crate::timer::RetransmitTimer;

/// Summary of a finished outbound transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferReport {
    /// Data segments acknowledged.
    pub chunks: u64,
    /// Payload bytes acknowledged.
    pub bytes: u64,
    /// Retransmissions over the whole connection, SYN and FIN included.
    pub retransmissions: u64,
    /// `false` when the FIN retry budget ran out.  All data was still
    /// acknowledged, so the transfer counts as complete.
    pub fin_acked: bool,
}

/// A handle to a single outbound DRTP connection.
pub struct Connection<C> {
    channel: C,
    peer: SocketAddr,
    sender: Sender,
    timer: RetransmitTimer,
    report: TransferReport,
}

impl<C: Channel> Connection<C> {
    /// Perform the SYN / SYN+ACK handshake with `peer`.
    ///
    /// Fails with [`DrtpError::HandshakeFailed`] once `config.max_retries`
    /// SYN retransmissions went unanswered.
    pub async fn connect(channel: C, peer: SocketAddr, config: &Config) -> Result<Self> {
        let mut conn = Self {
            channel,
            peer,
            sender: Sender::new(config.initial_seq, config.max_retries),
            timer: RetransmitTimer::new(config.timeout),
            report: TransferReport::default(),
        };

        let syn = conn.sender.open()?;
        info!("connecting to {peer} (isn={})", syn.header.seq);
        conn.transmit(&syn).await?;
        conn.await_ack().await?;
        info!("connection to {peer} established");
        Ok(conn)
    }

    pub fn state(&self) -> &SenderState {
        self.sender.state()
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Send one chunk and wait until the peer acknowledges it.
    pub async fn send_chunk(&mut self, chunk: Vec<u8>) -> Result<()> {
        let len = chunk.len() as u64;
        let segment = self.sender.send_chunk(chunk)?;
        debug!("→ DATA seq={} len={len}", segment.header.seq);
        self.transmit(&segment).await?;
        self.await_ack().await?;
        self.report.chunks += 1;
        self.report.bytes += len;
        Ok(())
    }

    /// Send everything `source` yields, one [`MAX_PAYLOAD`] chunk at a time.
    pub async fn send_stream<R>(&mut self, source: &mut R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            let chunk = read_chunk(source, MAX_PAYLOAD)
                .await
                .map_err(DrtpError::Stream)?;
            if chunk.is_empty() {
                return Ok(());
            }
            self.send_chunk(chunk).await?;
        }
    }

    /// Send FIN, wait for its ACK, and hand back the transfer summary.
    pub async fn close(mut self) -> Result<TransferReport> {
        let fin = self.sender.finish()?;
        debug!("→ FIN seq={}", fin.header.seq);
        self.transmit(&fin).await?;
        self.report.fin_acked = self.await_ack().await?;
        self.report.retransmissions = self.sender.retransmissions();
        info!(
            "transfer to {} complete: {} bytes in {} chunks, {} retransmissions",
            self.peer, self.report.bytes, self.report.chunks, self.report.retransmissions
        );
        Ok(self.report)
    }

    async fn transmit(&mut self, packet: &Packet) -> Result<()> {
        self.channel
            .send_to(packet, self.peer)
            .await
            .map_err(DrtpError::Channel)?;
        self.timer.arm();
        Ok(())
    }

    /// Block until the outstanding segment is acknowledged, retransmitting
    /// it on every timeout.
    ///
    /// Returns `false` only when a FIN exhausted its retry budget.
    async fn await_ack(&mut self) -> Result<bool> {
        loop {
            let deadline = self.timer.deadline();
            match timeout_at(deadline, self.channel.recv_from()).await {
                Ok(Ok((bytes, from))) => {
                    if from != self.peer {
                        debug!("dropping datagram from unexpected peer {from}");
                        continue;
                    }
                    let header = match Header::decode(&bytes) {
                        Ok(h) => h,
                        Err(e) => {
                            debug!("dropping datagram from {from}: {e}");
                            continue;
                        }
                    };
                    match self.sender.on_segment(&header) {
                        AckOutcome::Ignored => continue,
                        outcome => {
                            debug!("← {outcome:?}");
                            self.timer.cancel();
                            return Ok(true);
                        }
                    }
                }
                Ok(Err(e)) => return Err(DrtpError::Channel(e)),
                Err(_elapsed) => match self.sender.on_timeout()? {
                    Some(packet) => {
                        warn!(
                            "timeout in {}; retransmitting seq={} (retry {})",
                            self.sender.state(),
                            packet.header.seq,
                            self.sender.retries()
                        );
                        self.transmit(&packet).await?;
                    }
                    None => {
                        self.timer.cancel();
                        return Ok(false);
                    }
                },
            }
        }
    }
}

/// Handshake, stream all of `source` to `peer`, and tear down.
pub async fn transfer<C, R>(
    channel: C,
    peer: SocketAddr,
    source: &mut R,
    config: &Config,
) -> Result<TransferReport>
where
    C: Channel,
    R: AsyncRead + Unpin,
{
    let mut conn = Connection::connect(channel, peer, config).await?;
    conn.send_stream(source).await?;
    conn.close().await
}

/// Read up to `max_len` bytes, stopping short only at end of stream.
///
/// An empty result means the source is exhausted.
pub async fn read_chunk<R>(source: &mut R, max_len: usize) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; max_len];
    let mut filled = 0;
    while filled < max_len {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}
