//! The per-connection session driver.
//!
//! A session is one TCP connection and exactly one transaction. The state
//! machine receives request packets and drives them through the store:
//!
//! - PUT: two DATA payloads follow (key, then value); on success a single
//!   REPLY with status 0.
//! - GET: one DATA payload follows (key); on success a REPLY with status 0
//!   followed by a DATA packet carrying the value (or the null marker).
//! - COMMIT: no payload; a REPLY with the committed status.
//!
//! Any receive failure, malformed packet or server shutdown signal aborts
//! the transaction. An aborted session sends one final REPLY with the
//! aborted status (send errors ignored), then unregisters and closes.

use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, info};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;

use xacto::data::{Blob, Key};
use xacto::error::{CResult, Error};
use xacto::protocol::{recv_packet, send_packet, Packet, PacketType};
use xacto::store::Store;
use xacto::transaction::{Status, Transaction, TransactionManager};

use crate::registry::ClientRegistry;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SessionState {
    /// The transaction is pending and requests are being served.
    Active,
    /// Committed and replied; no further traffic.
    FinalizingCommit,
    /// Aborted; one final aborted reply goes out.
    FinalizingAbort,
    Closed,
}

struct Session {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    txn: Arc<Transaction>,
    store: Arc<Store>,
    shutdown: watch::Receiver<bool>,
    state: SessionState,
}

/// Serve one client connection to completion: register it, run the state
/// machine, unregister and close.
pub async fn serve_client(
    stream: TcpStream,
    peer: SocketAddr,
    store: Arc<Store>,
    manager: Arc<TransactionManager>,
    registry: Arc<ClientRegistry>,
) {
    let (id, shutdown) = registry.register();
    let txn = manager.begin();
    info!("client {} connected from {} as transaction {}", id, peer, txn.id());
    let (reader, writer) = stream.into_split();
    let mut session =
        Session { reader, writer, txn, store, shutdown, state: SessionState::Active };
    session.run().await;
    registry.unregister(id);
    info!("client {} closed", id);
}

impl Session {
    async fn run(&mut self) {
        while self.state == SessionState::Active {
            if let Err(err) = self.step().await {
                debug!("transaction {} aborted by session error: {}", self.txn.id(), err);
                self.txn.abort();
                self.state = SessionState::FinalizingAbort;
            }
        }
        if self.state == SessionState::FinalizingAbort {
            // Best effort: the peer may already be gone.
            let _ = send_packet(&mut self.writer, &Packet::reply(Status::Aborted)).await;
        }
        self.state = SessionState::Closed;
    }

    async fn step(&mut self) -> CResult<()> {
        let packet = self.recv().await?;
        match packet.ptype {
            PacketType::Put => self.handle_put().await,
            PacketType::Get => self.handle_get().await,
            PacketType::Commit => self.handle_commit().await,
            other => Err(Error::InvalidData(format!("unexpected {:?} request packet", other))),
        }
    }

    /// Receive one packet, treating the server shutdown signal exactly
    /// like EOF on the connection.
    async fn recv(&mut self) -> CResult<Packet> {
        tokio::select! {
            packet = recv_packet(&mut self.reader) => packet,
            _ = self.shutdown.changed() => {
                Err(Error::Io("session shut down by server".into()))
            }
        }
    }

    /// Receive the DATA packet a PUT or GET announces.
    async fn recv_data(&mut self) -> CResult<Packet> {
        let packet = self.recv().await?;
        if packet.ptype != PacketType::Data {
            return Err(Error::InvalidData(format!("expected DATA, got {:?}", packet.ptype)));
        }
        Ok(packet)
    }

    async fn send(&mut self, packet: Packet) -> CResult<()> {
        send_packet(&mut self.writer, &packet).await
    }

    async fn handle_put(&mut self) -> CResult<()> {
        let key_packet = self.recv_data().await?;
        let value_packet = self.recv_data().await?;
        let key = Key::new(Blob::from(key_packet.payload));
        let value = Blob::from(value_packet.payload);
        debug!(
            "put {} byte key / {} byte value in transaction {}",
            key.blob().len(),
            value.len(),
            self.txn.id()
        );
        match self.store.put(&self.txn, key, value) {
            Status::Pending => self.send(Packet::reply(Status::Pending)).await,
            _ => {
                self.state = SessionState::FinalizingAbort;
                Ok(())
            }
        }
    }

    async fn handle_get(&mut self) -> CResult<()> {
        let key_packet = self.recv_data().await?;
        let key = Key::new(Blob::from(key_packet.payload));
        debug!("get {} byte key in transaction {}", key.blob().len(), self.txn.id());
        let (status, value) = self.store.get(&self.txn, key);
        match status {
            Status::Pending => {
                self.send(Packet::reply(Status::Pending)).await?;
                self.send(Packet::data(&value)).await
            }
            _ => {
                self.state = SessionState::FinalizingAbort;
                Ok(())
            }
        }
    }

    async fn handle_commit(&mut self) -> CResult<()> {
        match self.txn.commit().await {
            Status::Committed => {
                self.state = SessionState::FinalizingCommit;
                // The transaction is already durable in its outcome; a
                // lost reply must not be turned into an abort.
                if let Err(err) = self.send(Packet::reply(Status::Committed)).await {
                    debug!("commit reply for transaction {} lost: {}", self.txn.id(), err);
                }
                Ok(())
            }
            _ => {
                self.state = SessionState::FinalizingAbort;
                Ok(())
            }
        }
    }
}
