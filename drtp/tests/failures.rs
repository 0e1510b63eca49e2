//! Failing sources, sinks and channels.
//!
//! The sink and source here are hand-written `AsyncWrite` / `AsyncRead`
//! doubles, so each failure happens at a known point in the transfer.

mod common;

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{ready, Context, Poll};
use std::time::Duration;

use drtp::packet::flags;
use drtp::{
    encode_header, transfer, Channel, Config, Connection, DrtpError, Packet, Server, Socket,
    MAX_PAYLOAD,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tokio::net::UdpSocket;
use tokio::time::Sleep;

use common::{loopback, pattern, start};

fn fast() -> Config {
    Config::new()
        .with_timeout(Duration::from_millis(30))
        .with_max_retries(3)
}

/// What a [`TestSink`] saw, readable after the server dropped it.
#[derive(Clone, Default)]
struct SinkHandle {
    written: Arc<Mutex<Vec<u8>>>,
    closed: Arc<AtomicBool>,
}

impl SinkHandle {
    fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }

    fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct TestSink {
    handle: SinkHandle,
    fail_writes: bool,
    close_delay: Duration,
    closing: Option<Pin<Box<Sleep>>>,
}

impl TestSink {
    fn new(handle: SinkHandle) -> Self {
        Self {
            handle,
            fail_writes: false,
            close_delay: Duration::ZERO,
            closing: None,
        }
    }

    fn failing(handle: SinkHandle) -> Self {
        Self {
            fail_writes: true,
            ..Self::new(handle)
        }
    }

    fn slow_to_close(handle: SinkHandle, delay: Duration) -> Self {
        Self {
            close_delay: delay,
            ..Self::new(handle)
        }
    }
}

impl AsyncWrite for TestSink {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.fail_writes {
            return Poll::Ready(Err(io::Error::other("disk full")));
        }
        self.handle.written.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let delay = this.close_delay;
        let closing = this
            .closing
            .get_or_insert_with(|| Box::pin(tokio::time::sleep(delay)));
        ready!(closing.as_mut().poll(cx));
        this.handle.closed.store(true, Ordering::SeqCst);
        Poll::Ready(Ok(()))
    }
}

struct BrokenSource;

impl AsyncRead for BrokenSource {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::other("read failed")))
    }
}

/// A channel whose sends always fail.
struct Unreachable;

impl Channel for Unreachable {
    async fn send_to(&self, _packet: &Packet, _dest: SocketAddr) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::AddrNotAvailable, "no route"))
    }

    async fn recv_from(&self) -> io::Result<(Vec<u8>, SocketAddr)> {
        std::future::pending().await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(loopback())
    }
}

#[tokio::test]
async fn failing_sink_ends_only_its_own_connection() {
    let handles = [SinkHandle::default(), SinkHandle::default()];
    let opened = Arc::new(AtomicUsize::new(0));

    let (sinks, counter) = (handles.clone(), Arc::clone(&opened));
    let socket = Socket::bind(loopback()).await.unwrap();
    let server = Server::new(socket, fast(), move |_peer: SocketAddr| {
        let sink = match counter.fetch_add(1, Ordering::SeqCst) {
            0 => TestSink::failing(sinks[0].clone()),
            _ => TestSink::new(sinks[1].clone()),
        };
        async move { Ok::<_, io::Error>(sink) }
    });
    let running = start(server.with_connection_limit(2));

    let a = Socket::bind(loopback()).await.unwrap();
    let a_addr = a.local_addr;
    let a_data = pattern(2 * MAX_PAYLOAD);
    let result = transfer(a, running.addr, &mut &a_data[..], &fast()).await;
    assert!(
        matches!(result, Err(DrtpError::TransferTimedOut { seq: 0, .. })),
        "unexpected result {result:?}"
    );

    let b = Socket::bind(loopback()).await.unwrap();
    let b_addr = b.local_addr;
    let b_data = pattern(3 * MAX_PAYLOAD + 5);
    transfer(b, running.addr, &mut &b_data[..], &fast())
        .await
        .unwrap();

    let outcomes = running.finish().await;
    assert_eq!(outcomes.len(), 2);
    for (peer, outcome) in &outcomes {
        if *peer == a_addr {
            assert!(matches!(outcome, Err(DrtpError::Stream(_))), "{outcome:?}");
        } else {
            assert_eq!(*peer, b_addr);
            assert_eq!(outcome.as_ref().unwrap().bytes, b_data.len() as u64);
        }
    }

    assert!(handles[0].closed());
    assert!(handles[0].written().is_empty());
    assert!(handles[1].closed());
    assert_eq!(handles[1].written(), b_data);
    assert_eq!(opened.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn sink_factory_failure_refuses_handshake() {
    let socket = Socket::bind(loopback()).await.unwrap();
    let server = Server::new(socket, fast(), |_peer: SocketAddr| async {
        Err::<TestSink, _>(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"))
    });
    let running = start(server.with_connection_limit(1));

    let client = Socket::bind(loopback()).await.unwrap();
    let result = Connection::connect(client, running.addr, &fast()).await;
    assert!(
        matches!(result, Err(DrtpError::HandshakeFailed { retries: 3 })),
        "unexpected result {:?}",
        result.err()
    );

    let outcomes = running.finish().await;
    assert!(!outcomes.is_empty());
    assert!(outcomes
        .iter()
        .all(|(_, r)| matches!(r, Err(DrtpError::Stream(_)))));
}

/// The source fails after one full chunk: the sender reports the stream
/// error, and the receiver keeps what it got.
#[tokio::test]
async fn failing_source_aborts_transfer() {
    let handle = SinkHandle::default();
    let sink_handle = handle.clone();
    let config = fast().with_idle_timeout(Duration::from_millis(150));
    let socket = Socket::bind(loopback()).await.unwrap();
    let server = Server::new(socket, config, move |_peer: SocketAddr| {
        let sink = TestSink::new(sink_handle.clone());
        async move { Ok::<_, io::Error>(sink) }
    });
    let running = start(server.with_connection_limit(1));

    let data = pattern(MAX_PAYLOAD + 400);
    let mut source = (&data[..]).chain(BrokenSource);
    let client = Socket::bind(loopback()).await.unwrap();
    let result = transfer(client, running.addr, &mut source, &fast()).await;
    assert!(
        matches!(result, Err(DrtpError::Stream(_))),
        "unexpected result {result:?}"
    );

    let outcomes = running.finish().await;
    assert!(matches!(outcomes[0].1, Err(DrtpError::PeerIdle { .. })));
    assert_eq!(handle.written(), &data[..MAX_PAYLOAD]);
    assert!(handle.closed());
}

#[tokio::test]
async fn channel_failure_is_not_retried() {
    let result = Connection::connect(Unreachable, loopback(), &fast()).await;
    match result {
        Err(DrtpError::Channel(e)) => assert_eq!(e.kind(), io::ErrorKind::AddrNotAvailable),
        other => panic!("unexpected result {:?}", other.err()),
    }
}

/// While a finished connection is still closing its sink, a FIN from the
/// same peer is answered statelessly instead of queueing behind it.
#[tokio::test]
async fn fin_during_slow_close_is_still_acked() {
    let handle = SinkHandle::default();
    let sink_handle = handle.clone();
    let config = fast().with_idle_timeout(Duration::from_millis(100));
    let socket = Socket::bind(loopback()).await.unwrap();
    let server = Server::new(socket, config, move |_peer: SocketAddr| {
        let sink = TestSink::slow_to_close(sink_handle.clone(), Duration::from_millis(600));
        async move { Ok::<_, io::Error>(sink) }
    });
    let running = start(server);

    let peer = UdpSocket::bind(loopback()).await.unwrap();
    let mut buf = [0u8; 64];
    peer.send_to(&encode_header(0, 0, flags::SYN), running.addr)
        .await
        .unwrap();
    let (n, _) = peer.recv_from(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], &encode_header(0, 0, flags::SYN | flags::ACK));

    // The idle timeout has fired and the sink is still closing.
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(!handle.closed());

    peer.send_to(&encode_header(0, 0, flags::FIN), running.addr)
        .await
        .unwrap();
    let (n, _) = tokio::time::timeout(Duration::from_millis(200), peer.recv_from(&mut buf))
        .await
        .expect("FIN was not acknowledged")
        .unwrap();
    assert_eq!(&buf[..n], &encode_header(0, 0, flags::ACK));

    let outcomes = running.stop().await;
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(outcomes[0].1, Err(DrtpError::PeerIdle { .. })));
    assert!(handle.closed());
}
