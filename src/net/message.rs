//! Message layer: request/response correlation, broadcast-gather, timeouts.
//!
//! Grounded on `net/connection.rs`'s split-task bridging of a socket and
//! channels, collapsed to a single `UdpSocket` since the coordinator has one
//! logical port shared by every peer, not one connection per peer. Expected-header
//! matching is a plain `Fn(&str) -> bool` closure rather than a regex
//! dependency — the predicates the scheduler needs are all simple equality
//! or small OR-chains.

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use serde_json::Value;
use tokio::net::UdpSocket;
use tokio::time::Instant;

use super::protocol::{decode_frame, encode_frame, Frame, ProtocolError};

const MAX_DATAGRAM: usize = 65_507;

#[derive(Debug)]
pub enum TransportError {
    Protocol(ProtocolError),
    Io(std::io::Error),
    Timeout,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol(e) => write!(f, "protocol: {e}"),
            Self::Io(e) => write!(f, "io: {e}"),
            Self::Timeout => write!(f, "timed out waiting for a response"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<ProtocolError> for TransportError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// One logical port over UDP. At-most-once delivery, no cross-sender
/// ordering guarantees — callers that need idempotence pick idempotent
/// headers.
pub struct Transport {
    socket: UdpSocket,
    broadcast_addrs: HashSet<SocketAddr>,
}

impl Transport {
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr).await?;
        socket.set_broadcast(true)?;
        Ok(Self {
            socket,
            broadcast_addrs: HashSet::new(),
        })
    }

    pub fn set_broadcast_peers(&mut self, peers: impl IntoIterator<Item = SocketAddr>) {
        self.broadcast_addrs = peers.into_iter().collect();
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub async fn send(&self, dest: SocketAddr, header: &str, payload: Value) -> Result<(), TransportError> {
        let bytes = encode_frame(&Frame::new(header, payload))?;
        self.socket.send_to(&bytes, dest).await?;
        Ok(())
    }

    pub async fn send_broadcast(&self, header: &str, payload: Value) -> Result<(), TransportError> {
        let bytes = encode_frame(&Frame::new(header, payload))?;
        for addr in &self.broadcast_addrs {
            self.socket.send_to(&bytes, *addr).await?;
        }
        Ok(())
    }

    /// Pull at most one message, waiting up to `poll_timeout`. Returns `None`
    /// on timeout rather than erroring — the tick loop treats "nothing
    /// arrived this tick" as routine.
    pub async fn receive(&self, poll_timeout: Duration) -> Result<Option<(SocketAddr, Frame)>, TransportError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        match tokio::time::timeout(poll_timeout, self.socket.recv_from(&mut buf)).await {
            Ok(Ok((n, from))) => Ok(Some((from, decode_frame(&buf[..n])?))),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Ok(None),
        }
    }

    /// Send one message and wait for a single response matching `expect`,
    /// ignoring anything else that arrives first (no per-sender FIFO is
    /// assumed, so unrelated traffic on the shared port is routine).
    pub async fn request(
        &self,
        dest: SocketAddr,
        header: &str,
        payload: Value,
        expect: impl Fn(&str) -> bool,
        timeout: Duration,
    ) -> Result<Frame, TransportError> {
        self.send(dest, header, payload).await?;
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Timeout);
            }
            match self.receive(remaining).await? {
                Some((_, frame)) if expect(&frame.header) => return Ok(frame),
                Some(_) => continue,
                None => return Err(TransportError::Timeout),
            }
        }
    }

    /// Broadcast then collect up to `expected_count` matching responses
    /// within `timeout`. Best-effort: returns whatever arrived if the
    /// deadline passes early.
    pub async fn broadcast_gather(
        &self,
        header: &str,
        payload: Value,
        expect: impl Fn(&str) -> bool,
        expected_count: usize,
        timeout: Duration,
    ) -> Result<Vec<(SocketAddr, Frame)>, TransportError> {
        self.send_broadcast(header, payload).await?;
        let deadline = Instant::now() + timeout;
        let mut results = Vec::new();
        while results.len() < expected_count {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            if let Some((from, frame)) = self.receive(remaining).await? {
                if expect(&frame.header) {
                    results.push((from, frame));
                }
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_and_receive_round_trip() {
        let a = Transport::bind("127.0.0.1:0").await.unwrap();
        let b = Transport::bind("127.0.0.1:0").await.unwrap();
        let b_addr = b.local_addr().unwrap();

        a.send(b_addr, "stor_discover", Value::Null).await.unwrap();
        let (_, frame) = b
            .receive(Duration::from_secs(1))
            .await
            .unwrap()
            .expect("message should have arrived");
        assert_eq!(frame.header, "stor_discover");
    }

    #[tokio::test]
    async fn receive_times_out_with_no_traffic() {
        let a = Transport::bind("127.0.0.1:0").await.unwrap();
        let result = a.receive(Duration::from_millis(20)).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn request_resolves_on_matching_header() {
        let client = Transport::bind("127.0.0.1:0").await.unwrap();
        let server = Transport::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let client_addr = client.local_addr().unwrap();

        let responder = tokio::spawn(async move {
            let (from, frame) = server.receive(Duration::from_secs(1)).await.unwrap().unwrap();
            assert_eq!(frame.header, "stor_get_drone_item_list");
            server
                .send(from, "stor_drone_item_list", Value::Array(vec![]))
                .await
                .unwrap();
        });

        let response = client
            .request(
                server_addr,
                "stor_get_drone_item_list",
                Value::Null,
                |h| h == "stor_drone_item_list",
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert_eq!(response.header, "stor_drone_item_list");
        let _ = client_addr;
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn request_times_out_without_a_response() {
        let client = Transport::bind("127.0.0.1:0").await.unwrap();
        let dead_end = Transport::bind("127.0.0.1:0").await.unwrap();
        let dead_end_addr = dead_end.local_addr().unwrap();
        drop(dead_end);

        let result = client
            .request(dead_end_addr, "stor_discover", Value::Null, |h| h == "stor_item_list", Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(TransportError::Timeout)));
    }
}
