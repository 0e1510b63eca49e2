//! Shared helpers for the loopback integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use drtp::server::ConnectionOutcome;
use drtp::{Channel, Server};
use tokio::io::AsyncWrite;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// Deterministic, non-repeating-per-chunk test bytes.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// A server running in a background task.
pub struct Running {
    pub addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<drtp::Result<Vec<ConnectionOutcome>>>,
}

impl Running {
    /// Wait for the server to stop on its own (connection limit reached).
    pub async fn finish(self) -> Vec<ConnectionOutcome> {
        let Running { stop, handle, .. } = self;
        let outcomes = tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .expect("server did not stop")
            .expect("server task panicked")
            .expect("server failed");
        drop(stop);
        outcomes
    }

    /// Trigger shutdown, then wait for the server to stop.
    pub async fn stop(mut self) -> Vec<ConnectionOutcome> {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
        self.finish().await
    }
}

pub fn start<C, F, Fut, W>(server: Server<C, F>) -> Running
where
    C: Channel + Send + Sync + 'static,
    F: Fn(SocketAddr) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = io::Result<W>> + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let addr = server.local_addr().expect("server address");
    let (tx, rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.run(async move {
        // A dropped handle never shuts the server down.
        if rx.await.is_err() {
            std::future::pending::<()>().await;
        }
    }));
    Running {
        addr,
        stop: Some(tx),
        handle,
    }
}
