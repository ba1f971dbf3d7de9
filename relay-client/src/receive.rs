//! Background reader that turns inbound `relay` units into [`IncomingMessage`]s.
//!
//! The loop owns the read half of the connection. It has no stop command of
//! its own: it ends on the first error, and the session triggers that by
//! firing (or dropping) the stop signal when it closes.

use tokio::{
    io::AsyncBufRead,
    select,
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::{
    error::{ClientError, Result},
    ids::Identity,
    protocol::{RELAY, parse_relay_header, read_line, read_payload, split_keyword},
};

/// A payload relayed to us by the hub on behalf of `sender`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub sender: Identity,
    pub payload: Vec<u8>,
}

pub struct ReceiveLoop<R> {
    reader: R,
    delivery: mpsc::Sender<IncomingMessage>,
    stop: oneshot::Receiver<()>,
}

impl<R> ReceiveLoop<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(
        reader: R,
        delivery: mpsc::Sender<IncomingMessage>,
        stop: oneshot::Receiver<()>,
    ) -> Self {
        Self {
            reader,
            delivery,
            stop,
        }
    }

    /// Runs until the stream fails, the stop signal fires, or the
    /// application drops its receiver. Returns the reason it stopped.
    ///
    /// A full delivery channel stalls the loop instead of dropping messages.
    pub async fn run(self) -> ClientError {
        let ReceiveLoop {
            mut reader,
            delivery,
            mut stop,
        } = self;

        let error = loop {
            // Stop is checked first so nothing is read or delivered after close.
            let message = select! {
                biased;
                _ = &mut stop => break ClientError::ConnectionClosed,
                next = next_message(&mut reader) => match next {
                    Ok(Some(message)) => message,
                    Ok(None) => continue,
                    Err(err) => break err,
                },
            };

            select! {
                biased;
                _ = &mut stop => break ClientError::ConnectionClosed,
                sent = delivery.send(message) => {
                    if sent.is_err() {
                        break ClientError::DeliveryClosed;
                    }
                }
            }
        };

        match &error {
            ClientError::ConnectionClosed => debug!("receive loop finished: connection closed"),
            other => warn!(error = %other, "receive loop stopped"),
        }
        error
    }

    pub fn spawn(self) -> ReceiveHandle
    where
        R: Send + 'static,
    {
        ReceiveHandle {
            task: tokio::spawn(self.run()),
        }
    }
}

/// Reads one protocol unit. Lines with an unknown keyword are skipped.
async fn next_message<R>(reader: &mut R) -> Result<Option<IncomingMessage>>
where
    R: AsyncBufRead + Unpin,
{
    let line = read_line(reader).await?;
    let (keyword, rest) = split_keyword(&line);

    match keyword {
        RELAY => {
            let (sender, len) = parse_relay_header(rest)?;
            let payload = read_payload(reader, len).await?;
            debug!(sender, len, "relay received");
            Ok(Some(IncomingMessage { sender, payload }))
        }
        _ => {
            warn!(keyword, "ignoring unrecognized line from hub");
            Ok(None)
        }
    }
}

/// Handle to a spawned receive loop.
///
/// The delivery channel closing is the usual sign the loop has ended;
/// [`ReceiveHandle::join`] says why.
pub struct ReceiveHandle {
    task: JoinHandle<ClientError>,
}

impl ReceiveHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn join(self) -> ClientError {
        match self.task.await {
            Ok(error) => error,
            Err(join_error) => ClientError::Task(join_error),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{
        io::{AsyncWriteExt, BufReader, DuplexStream},
        time::timeout,
    };

    use super::*;
    use crate::error::ProtocolError;

    struct Harness {
        hub: DuplexStream,
        inbox: mpsc::Receiver<IncomingMessage>,
        stop: oneshot::Sender<()>,
        handle: ReceiveHandle,
    }

    fn start(capacity: usize) -> Harness {
        let (hub, client) = tokio::io::duplex(1024);
        let (tx, inbox) = mpsc::channel(capacity);
        let (stop, stop_rx) = oneshot::channel();
        let handle = ReceiveLoop::new(BufReader::new(client), tx, stop_rx).spawn();
        Harness {
            hub,
            inbox,
            stop,
            handle,
        }
    }

    async fn recv(inbox: &mut mpsc::Receiver<IncomingMessage>) -> Option<IncomingMessage> {
        timeout(Duration::from_secs(1), inbox.recv())
            .await
            .expect("timed out waiting for delivery")
    }

    #[tokio::test]
    async fn delivers_binary_payload_exactly() {
        let mut h = start(8);
        h.hub.write_all(b"relay 5 3\n\x01\x02\x03").await.unwrap();

        let message = recv(&mut h.inbox).await.expect("message");
        assert_eq!(
            message,
            IncomingMessage {
                sender: 5,
                payload: vec![1, 2, 3]
            }
        );
        drop(h.stop);
    }

    #[tokio::test]
    async fn payload_may_contain_newlines() {
        let mut h = start(8);
        h.hub
            .write_all(b"relay 2 4\na\nb\nrelay 3 0\n")
            .await
            .unwrap();

        assert_eq!(recv(&mut h.inbox).await.unwrap().payload, b"a\nb\n");
        let empty = recv(&mut h.inbox).await.unwrap();
        assert_eq!(empty.sender, 3);
        assert!(empty.payload.is_empty());
        drop(h.stop);
    }

    #[tokio::test]
    async fn unknown_keyword_is_skipped() {
        let mut h = start(8);
        h.hub
            .write_all(b"ping whatever\nidentity 9\nrelay 7 2\nhi")
            .await
            .unwrap();

        let message = recv(&mut h.inbox).await.expect("message after unknown lines");
        assert_eq!(message.sender, 7);
        assert_eq!(message.payload, b"hi");
        assert!(!h.handle.is_finished());
        drop(h.stop);
    }

    #[tokio::test]
    async fn short_payload_ends_loop_without_delivery() {
        let mut h = start(8);
        h.hub.write_all(b"relay 5 10\nabc").await.unwrap();
        drop(h.hub);

        assert_eq!(recv(&mut h.inbox).await, None);
        assert!(matches!(
            h.handle.join().await,
            ClientError::ShortRead {
                expected: 10,
                received: 3
            }
        ));
    }

    #[tokio::test]
    async fn malformed_relay_header_is_fatal() {
        let mut h = start(8);
        h.hub.write_all(b"relay five 3\nabc").await.unwrap();

        assert_eq!(recv(&mut h.inbox).await, None);
        assert!(matches!(
            h.handle.join().await,
            ClientError::Protocol(ProtocolError::InvalidInteger { field: "sender", .. })
        ));
    }

    #[tokio::test]
    async fn stream_closure_ends_loop() {
        let mut h = start(8);
        drop(h.hub);

        assert_eq!(recv(&mut h.inbox).await, None);
        assert!(matches!(h.handle.join().await, ClientError::ConnectionClosed));
    }

    #[tokio::test]
    async fn stop_signal_interrupts_a_blocked_read() {
        let h = start(8);
        h.stop.send(()).unwrap();

        let error = timeout(Duration::from_secs(1), h.handle.join())
            .await
            .expect("loop should stop promptly");
        assert!(matches!(error, ClientError::ConnectionClosed));
    }

    #[tokio::test]
    async fn nothing_is_delivered_once_stopped() {
        for _ in 0..50 {
            let (mut hub, client) = tokio::io::duplex(1024);
            let (tx, mut inbox) = mpsc::channel(8);
            let (stop, stop_rx) = oneshot::channel();
            hub.write_all(b"relay 5 3\nabc").await.unwrap();
            stop.send(()).unwrap();

            let error = ReceiveLoop::new(BufReader::new(client), tx, stop_rx)
                .run()
                .await;
            assert!(matches!(error, ClientError::ConnectionClosed));
            assert_eq!(inbox.recv().await, None);
        }
    }

    #[tokio::test]
    async fn stop_signal_interrupts_a_full_channel() {
        let mut h = start(1);
        h.hub
            .write_all(b"relay 1 1\narelay 1 1\nb")
            .await
            .unwrap();

        // First message fills the channel, the second leaves the loop parked on send.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!h.handle.is_finished());
        h.stop.send(()).unwrap();

        let error = timeout(Duration::from_secs(1), h.handle.join())
            .await
            .expect("loop should stop promptly");
        assert!(matches!(error, ClientError::ConnectionClosed));
        assert_eq!(h.inbox.recv().await.unwrap().payload, b"a");
    }

    #[tokio::test]
    async fn dropped_receiver_ends_loop() {
        let mut h = start(8);
        drop(h.inbox);
        h.hub.write_all(b"relay 1 1\nx").await.unwrap();

        assert!(matches!(h.handle.join().await, ClientError::DeliveryClosed));
        drop(h.stop);
    }
}
