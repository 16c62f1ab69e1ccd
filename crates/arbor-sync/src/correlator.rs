//! Request correlation: sequence allocation and pending reply slots.
//!
//! Each connection owns a [`SeqCounter`] and a [`PendingTable`]. The table
//! lives inside the connection's lock; [`await_reply`] runs outside it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::{Result, SyncError};
use crate::messages::Message;

/// Per-connection sequence number source.
///
/// Starts at 1. Zero is reserved to mean "not a response" and is never
/// handed out. A connection gets at most `u32::MAX` numbers; after that
/// [`next`](Self::next) yields `None` for good and the connection must close.
#[derive(Debug)]
pub struct SeqCounter(AtomicU64);

impl SeqCounter {
    pub fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    /// Allocate the next sequence number, or `None` once exhausted.
    pub fn next(&self) -> Option<u32> {
        let seq = self.0.fetch_add(1, Ordering::Relaxed);
        u32::try_from(seq).ok()
    }

    #[cfg(test)]
    pub(crate) fn skip_to(&self, next: u64) {
        self.0.store(next, Ordering::Relaxed);
    }
}

impl Default for SeqCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Outstanding requests of one connection, keyed by request sequence.
#[derive(Debug, Default)]
pub struct PendingTable {
    slots: HashMap<u32, oneshot::Sender<Message>>,
    closed: bool,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reply slot for `seq`.
    ///
    /// On a closed connection the returned receiver resolves immediately as
    /// closed.
    pub fn register(&mut self, seq: u32) -> oneshot::Receiver<Message> {
        let (tx, rx) = oneshot::channel();
        if !self.closed {
            self.slots.insert(seq, tx);
        }
        rx
    }

    /// Deliver a response. Returns false if nothing was waiting on `rseq`.
    pub fn resolve(&mut self, rseq: u32, message: Message) -> bool {
        match self.slots.remove(&rseq) {
            // The waiter may have given up between lookup and send.
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    /// Forget a slot (after a timeout or a failed send).
    pub fn cancel(&mut self, seq: u32) {
        self.slots.remove(&seq);
    }

    /// Close the table. Every waiter resolves as closed; later registrations
    /// resolve as closed immediately.
    pub fn close(&mut self) -> usize {
        self.closed = true;
        let released = self.slots.len();
        self.slots.clear();
        released
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Wait for a reply: the response, the deadline, or the close, whichever
/// comes first.
///
/// On timeout the caller must cancel the slot.
pub async fn await_reply(
    reply: oneshot::Receiver<Message>,
    timeout: Option<Duration>,
) -> Result<Message> {
    let outcome = match timeout {
        Some(limit) => tokio::time::timeout(limit, reply)
            .await
            .map_err(|_| SyncError::Timeout)?,
        None => reply.await,
    };
    outcome.map_err(|_| SyncError::Closed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_starts_at_one_and_increases() {
        let counter = SeqCounter::new();
        let seqs: Vec<u32> = (0..100).map(|_| counter.next().unwrap()).collect();
        assert_eq!(seqs[0], 1);
        assert!(seqs.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_seq_exhausts_instead_of_wrapping() {
        let counter = SeqCounter::new();
        counter.skip_to(u64::from(u32::MAX));
        assert_eq!(counter.next(), Some(u32::MAX));
        assert_eq!(counter.next(), None);
        assert_eq!(counter.next(), None);
    }

    #[tokio::test]
    async fn test_response_delivered_once() {
        let mut table = PendingTable::new();
        let rx = table.register(7);

        assert!(table.resolve(7, Message::Ok));
        assert!(!table.resolve(7, Message::Ok));
        assert!(table.is_empty());

        let reply = await_reply(rx, None).await.unwrap();
        assert_eq!(reply, Message::Ok);
    }

    #[test]
    fn test_unmatched_response_dropped() {
        let mut table = PendingTable::new();
        let _rx = table.register(1);
        assert!(!table.resolve(2, Message::Ok));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_late_response() {
        let mut table = PendingTable::new();
        let rx = table.register(3);

        let result = await_reply(rx, Some(Duration::from_millis(50))).await;
        assert!(matches!(result, Err(SyncError::Timeout)));

        table.cancel(3);
        assert!(!table.resolve(3, Message::Ok));
    }

    #[tokio::test]
    async fn test_close_releases_waiters() {
        let mut table = PendingTable::new();
        let a = table.register(1);
        let b = table.register(2);

        assert_eq!(table.close(), 2);

        assert!(matches!(await_reply(a, None).await, Err(SyncError::Closed)));
        assert!(matches!(
            await_reply(b, Some(Duration::from_secs(5))).await,
            Err(SyncError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_register_after_close() {
        let mut table = PendingTable::new();
        table.close();
        let rx = table.register(9);
        assert!(table.is_closed());
        assert!(matches!(await_reply(rx, None).await, Err(SyncError::Closed)));
    }
}
