//! Fault-injecting channel for exercising the reliability logic.
//!
//! Real networks drop, reorder, and duplicate packets.  To exercise the
//! retransmission paths without depending on actual network conditions,
//! [`Simulator`] wraps any [`Channel`] and applies a fault model to every
//! outbound datagram:
//!
//! | Fault            | Description                                      |
//! |------------------|--------------------------------------------------|
//! | Scripted drop    | Drop the N-th outbound datagram (0-based).       |
//! | Packet loss      | Drop a packet with probability `loss_rate`.      |
//! | Reordering       | Delay a packet by `reorder_delay`, letting later |
//! |                  | packets overtake it.                             |
//! | Duplication      | Deliver a packet twice.                          |
//!
//! Random faults draw from an RNG seeded with `seed`, so a failing run can be
//! replayed.  Inbound datagrams pass through untouched; wrap the other end to
//! fault the reverse direction.

use std::collections::BTreeSet;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::packet::Packet;
use crate::socket::Channel;

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probability that any given packet is silently dropped.
    pub loss_rate: f64,
    /// Probability that a packet is reordered.
    pub reorder_rate: f64,
    /// Fixed delay applied to reordered packets.
    pub reorder_delay: Duration,
    /// Probability that a packet is duplicated.
    pub duplicate_rate: f64,
    /// Outbound datagram indices that are always dropped.
    pub drop_outbound: BTreeSet<u64>,
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults by default; the simulator is a transparent pass-through.
        Self {
            loss_rate: 0.0,
            reorder_rate: 0.0,
            reorder_delay: Duration::ZERO,
            duplicate_rate: 0.0,
            drop_outbound: BTreeSet::new(),
            seed: 0,
        }
    }
}

impl SimulatorConfig {
    /// Drop exactly the listed outbound datagrams and nothing else.
    pub fn dropping(indices: impl IntoIterator<Item = u64>) -> Self {
        Self {
            drop_outbound: indices.into_iter().collect(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fate {
    Drop,
    Delay,
    Deliver { copies: usize },
}

/// A fault-injecting wrapper around another channel.
#[derive(Debug)]
pub struct Simulator<C> {
    inner: Arc<C>,
    config: SimulatorConfig,
    rng: Mutex<StdRng>,
    sent: AtomicU64,
    dropped: AtomicU64,
}

impl<C> Simulator<C> {
    pub fn new(inner: C, config: SimulatorConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            inner: Arc::new(inner),
            config,
            rng: Mutex::new(rng),
            sent: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Outbound datagrams seen so far, dropped ones included.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn roll(&self, index: u64) -> Fate {
        if self.config.drop_outbound.contains(&index) {
            return Fate::Drop;
        }
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if rng.random::<f64>() < self.config.loss_rate {
            Fate::Drop
        } else if rng.random::<f64>() < self.config.reorder_rate {
            Fate::Delay
        } else if rng.random::<f64>() < self.config.duplicate_rate {
            Fate::Deliver { copies: 2 }
        } else {
            Fate::Deliver { copies: 1 }
        }
    }
}

impl<C> Channel for Simulator<C>
where
    C: Channel + Send + Sync + 'static,
{
    async fn send_to(&self, packet: &Packet, dest: SocketAddr) -> io::Result<()> {
        let index = self.sent.fetch_add(1, Ordering::Relaxed);
        match self.roll(index) {
            Fate::Drop => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("[sim] dropping datagram #{index} seq={}", packet.header.seq);
                Ok(())
            }
            Fate::Delay => {
                debug!("[sim] delaying datagram #{index} by {:?}", self.config.reorder_delay);
                let inner = Arc::clone(&self.inner);
                let packet = packet.clone();
                let delay = self.config.reorder_delay;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = inner.send_to(&packet, dest).await;
                });
                Ok(())
            }
            Fate::Deliver { copies } => {
                for _ in 0..copies {
                    self.inner.send_to(packet, dest).await?;
                }
                Ok(())
            }
        }
    }

    async fn recv_from(&self) -> io::Result<(Vec<u8>, SocketAddr)> {
        self.inner.recv_from().await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}
