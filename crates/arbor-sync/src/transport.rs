//! Transport link: the boundary between the sync engine and the network.
//!
//! Dialing, listening and link-level encryption happen elsewhere. By the time
//! a connection is handed to the engine it is just two queues of whole
//! frames: one inbound, one bounded outbound.

use std::fmt;

use bytes::Bytes;
use tokio::sync::mpsc;

/// Which side opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// The remote peer dialed us.
    Incoming,
    /// We dialed the remote peer.
    Outgoing,
}

/// The kind of transport carrying the frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Reliable, ordered byte stream (TCP).
    Stream,
    /// Message-oriented transport (UDP).
    Datagram,
    /// In-process pipe.
    Memory,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Stream => f.write_str("stream"),
            TransportKind::Datagram => f.write_str("datagram"),
            TransportKind::Memory => f.write_str("memory"),
        }
    }
}

/// An established link to one peer.
///
/// The engine reads frames from `inbound` until it yields `None` and writes
/// frames to `outbound`. Dropping the outbound sender signals the peer that
/// this side is gone.
#[derive(Debug)]
pub struct Link {
    pub inbound: mpsc::Receiver<Bytes>,
    pub outbound: mpsc::Sender<Bytes>,
    pub kind: TransportKind,
}

/// A simple in-memory transport for testing.
pub mod memory {
    use super::*;

    /// Create two links wired to each other.
    ///
    /// Frames sent on one link's `outbound` arrive on the other's `inbound`.
    /// `capacity` bounds each direction.
    pub fn pipe(capacity: usize) -> (Link, Link) {
        let (a_tx, b_rx) = mpsc::channel(capacity.max(1));
        let (b_tx, a_rx) = mpsc::channel(capacity.max(1));

        let a = Link {
            inbound: a_rx,
            outbound: a_tx,
            kind: TransportKind::Memory,
        };
        let b = Link {
            inbound: b_rx,
            outbound: b_tx,
            kind: TransportKind::Memory,
        };
        (a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::memory::pipe;

    #[tokio::test]
    async fn test_pipe_delivers_both_ways() {
        let (mut a, mut b) = pipe(4);

        a.outbound.send("ping".into()).await.unwrap();
        assert_eq!(b.inbound.recv().await.unwrap(), "ping");

        b.outbound.send("pong".into()).await.unwrap();
        assert_eq!(a.inbound.recv().await.unwrap(), "pong");
    }

    #[tokio::test]
    async fn test_dropping_sender_ends_peer_inbound() {
        let (a, mut b) = pipe(4);
        drop(a.outbound);
        assert!(b.inbound.recv().await.is_none());
    }
}
