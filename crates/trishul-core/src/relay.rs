// ABOUTME: Cross-process event relay: workers send one JSON event per datagram.
// ABOUTME: The listener validates each message and hands it to the broadcast queue.

use crate::broadcast::BroadcastQueue;
use crate::message::WorkerEvent;
use async_trait::async_trait;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

/// Largest payload a single UDP datagram can carry.
const MAX_DATAGRAM: usize = 65_507;

/// Transport carrying raw event messages from workers.
#[async_trait]
pub trait EventChannel: Send {
    /// Wait for the next message.
    async fn recv(&mut self) -> io::Result<Vec<u8>>;
}

/// Loopback UDP transport.
pub struct UdpChannel {
    socket: UdpSocket,
    buf: Vec<u8>,
}

impl UdpChannel {
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket,
            buf: vec![0; MAX_DATAGRAM],
        })
    }

    /// Bind `127.0.0.1:port`.
    pub async fn loopback(port: u16) -> io::Result<Self> {
        Self::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port))).await
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[async_trait]
impl EventChannel for UdpChannel {
    async fn recv(&mut self) -> io::Result<Vec<u8>> {
        let (len, _) = self.socket.recv_from(&mut self.buf).await?;
        Ok(self.buf[..len].to_vec())
    }
}

/// Sender side of the loopback transport, as a worker would use it.
pub struct UdpEventSender {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpEventSender {
    pub async fn connect(target: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).await?;
        Ok(Self { socket, target })
    }

    pub async fn send(&self, payload: &[u8]) -> io::Result<()> {
        self.socket.send_to(payload, self.target).await.map(|_| ())
    }
}

/// The single long-lived listener that feeds worker events to clients.
pub struct EventRelay<C> {
    channel: C,
    queue: BroadcastQueue,
}

impl<C: EventChannel> EventRelay<C> {
    pub fn new(channel: C, queue: BroadcastQueue) -> Self {
        Self { channel, queue }
    }

    /// Receive until cancelled. Bad messages and receive errors are logged
    /// and skipped.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!("Event relay listening");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = self.channel.recv() => match received {
                    Ok(bytes) => {
                        self.handle(&bytes);
                    }
                    Err(e) => tracing::warn!(error = %e, "Event relay receive failed"),
                },
            }
        }
        tracing::info!("Event relay stopped");
    }

    /// Decode one message and queue it for broadcast. Returns whether it
    /// was queued.
    pub fn handle(&self, bytes: &[u8]) -> bool {
        match WorkerEvent::decode(bytes) {
            Ok(event) => {
                tracing::debug!(event_type = event.event_type(), "Relaying worker event");
                self.queue.push(event.into_raw())
            }
            Err(e) => {
                tracing::warn!(error = %e, len = bytes.len(), "Dropping malformed relay message");
                false
            }
        }
    }
}
