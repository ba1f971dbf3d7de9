use std::{fmt, net::SocketAddr};

use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::{
        TcpStream, ToSocketAddrs,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::{mpsc, oneshot},
};
use tracing::{debug, info, warn};

use crate::{
    error::{ClientError, Result},
    ids::Identity,
    protocol::{
        IDENTITY, LIST, encode_relay, parse_identity_reply, parse_list_reply, read_line,
        request_line, write_frame,
    },
    receive::{IncomingMessage, ReceiveHandle, ReceiveLoop},
};

/// One client connection to a hub.
///
/// Control requests (`identify`, `list_peers`) read their reply from the
/// shared stream, so they only work until [`Session::start_receiving`] hands
/// the read half to the receive loop. After that they fail with
/// [`ClientError::ReaderDetached`]; `send_relay` keeps working since it
/// only writes.
pub struct Session {
    identity: Option<Identity>,
    conn: Option<Connection>,
}

struct Connection {
    reader: Option<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    // Dropping this also stops the receive loop.
    stop: Option<oneshot::Sender<()>>,
    local: SocketAddr,
    peer: SocketAddr,
}

impl Session {
    pub async fn connect<A>(addr: A) -> Result<Self>
    where
        A: ToSocketAddrs + fmt::Display,
    {
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| ClientError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        let local = stream.local_addr()?;
        let peer = stream.peer_addr()?;

        info!(%peer, "connected to hub");

        let (reader, writer) = stream.into_split();
        Ok(Self {
            identity: None,
            conn: Some(Connection {
                reader: Some(BufReader::new(reader)),
                writer,
                stop: None,
                local,
                peer,
            }),
        })
    }

    /// The identity learned by the last successful [`Session::identify`].
    pub fn identity(&self) -> Option<Identity> {
        self.identity
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.conn.as_ref().map(|conn| conn.local)
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.conn.as_ref().map(|conn| conn.peer)
    }

    /// Asks the hub which identity it assigned to this connection.
    pub async fn identify(&mut self) -> Result<Identity> {
        let line = self.request(IDENTITY).await?;
        let identity = parse_identity_reply(&line)?;

        info!(identity, "hub assigned identity");
        self.identity = Some(identity);
        Ok(identity)
    }

    /// Snapshot of the other clients currently connected to the hub.
    pub async fn list_peers(&mut self) -> Result<Vec<Identity>> {
        let line = self.request(LIST).await?;
        let peers = parse_list_reply(&line)?;

        debug!(count = peers.len(), "listed peers");
        Ok(peers)
    }

    /// Sends `payload` to every identity in `recipients`. Nothing is read
    /// back; the hub does not acknowledge relays.
    pub async fn send_relay(&mut self, recipients: &[Identity], payload: &[u8]) -> Result<()> {
        let frame = encode_relay(recipients, payload);
        let conn = self.connection()?;
        let sent = write_frame(&mut conn.writer, &frame).await;
        if let Err(err) = sent {
            return Err(self.teardown_on(err));
        }

        debug!(?recipients, len = payload.len(), "relay sent");
        Ok(())
    }

    /// Moves the read half into a background receive loop that forwards
    /// every relayed message into `delivery`.
    ///
    /// The loop waits for room in `delivery` rather than dropping messages,
    /// so a slow consumer stalls reading from the hub.
    pub fn start_receiving(
        &mut self,
        delivery: mpsc::Sender<IncomingMessage>,
    ) -> Result<ReceiveHandle> {
        let conn = self.connection()?;
        let reader = conn.reader.take().ok_or(ClientError::ReaderDetached)?;
        let (stop, stop_rx) = oneshot::channel();
        conn.stop = Some(stop);

        debug!(peer = %conn.peer, "starting receive loop");
        Ok(ReceiveLoop::new(reader, delivery, stop_rx).spawn())
    }

    /// [`Session::start_receiving`] with a fresh channel of `capacity` slots.
    pub fn subscribe(
        &mut self,
        capacity: usize,
    ) -> Result<(ReceiveHandle, mpsc::Receiver<IncomingMessage>)> {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = self.start_receiving(tx)?;
        Ok((handle, rx))
    }

    /// Shuts the connection down and stops the receive loop, if one is
    /// running. Closing an already closed session does nothing.
    pub async fn close(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };

        if let Some(stop) = conn.stop.take() {
            let _ = stop.send(());
        }
        if let Err(error) = conn.writer.shutdown().await {
            warn!(?error, "failed to shut down hub writer cleanly");
        }

        info!(peer = %conn.peer, "session closed");
    }

    async fn request(&mut self, keyword: &str) -> Result<String> {
        let conn = self.connection()?;
        let reply = conn.round_trip(keyword).await;
        reply.map_err(|err| self.teardown_on(err))
    }

    fn connection(&mut self) -> Result<&mut Connection> {
        self.conn.as_mut().ok_or(ClientError::NotConnected)
    }

    fn teardown_on(&mut self, error: ClientError) -> ClientError {
        if error.is_connection_error() && self.conn.take().is_some() {
            warn!(error = %error, "dropping broken hub connection");
        }
        error
    }
}

impl Connection {
    async fn round_trip(&mut self, keyword: &str) -> Result<String> {
        let reader = self.reader.as_mut().ok_or(ClientError::ReaderDetached)?;
        write_frame(&mut self.writer, &request_line(keyword)).await?;
        read_line(reader).await
    }
}
