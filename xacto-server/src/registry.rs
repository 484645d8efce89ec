//! The client registry: tracks live client sessions and coordinates
//! graceful shutdown.
//!
//! Every session registers on connect and unregisters when it is done.
//! Shutdown asks each registered session to stop through its shutdown
//! signal; a session treats the signal exactly like EOF on its socket, so
//! it finalizes its transaction with an aborted reply and drains out.
//! `wait_until_empty` returns once the registered set has drained.

use std::collections::HashMap;

use log::{debug, info};
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};

struct Registered {
    next_id: u64,
    sessions: HashMap<u64, watch::Sender<bool>>,
}

pub struct ClientRegistry {
    clients: Mutex<Registered>,
    empty: Notify,
}

impl ClientRegistry {
    pub fn new() -> Self {
        ClientRegistry {
            clients: Mutex::new(Registered { next_id: 0, sessions: HashMap::new() }),
            empty: Notify::new(),
        }
    }

    /// Register a new client session. Returns its registry ID and the
    /// shutdown signal the session must watch while reading.
    pub fn register(&self) -> (u64, watch::Receiver<bool>) {
        let mut clients = self.clients.lock();
        let id = clients.next_id;
        clients.next_id += 1;
        let (sender, receiver) = watch::channel(false);
        clients.sessions.insert(id, sender);
        debug!("registered client {} ({} active)", id, clients.sessions.len());
        (id, receiver)
    }

    /// Unregister a client session, waking anybody waiting for the
    /// registered set to become empty.
    pub fn unregister(&self, id: u64) {
        let drained = {
            let mut clients = self.clients.lock();
            clients.sessions.remove(&id);
            debug!("unregistered client {} ({} active)", id, clients.sessions.len());
            clients.sessions.is_empty()
        };
        if drained {
            self.empty.notify_waiters();
        }
    }

    pub fn count(&self) -> usize {
        self.clients.lock().sessions.len()
    }

    /// Block until the registered set is empty.
    pub async fn wait_until_empty(&self) {
        loop {
            let notified = self.empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.clients.lock().sessions.is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Ask every registered session to shut down. Sessions observe the
    /// signal at their next read, finalize, and unregister themselves.
    pub fn shutdown_all(&self) {
        let clients = self.clients.lock();
        info!("shutting down {} client session(s)", clients.sessions.len());
        for (id, sender) in clients.sessions.iter() {
            if sender.send(true).is_err() {
                debug!("client {} already gone", id);
            }
        }
        drop(clients);
        self.empty.notify_waiters();
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn register_and_unregister() {
        let registry = ClientRegistry::new();
        let (a, _rx_a) = registry.register();
        let (b, _rx_b) = registry.register();
        assert_ne!(a, b);
        assert_eq!(registry.count(), 2);
        registry.unregister(a);
        assert_eq!(registry.count(), 1);
        registry.unregister(b);
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn wait_until_empty_returns_immediately_when_empty() {
        let registry = ClientRegistry::new();
        tokio::time::timeout(Duration::from_secs(1), registry.wait_until_empty())
            .await
            .expect("wait on empty registry should not block");
    }

    #[tokio::test]
    async fn wait_until_empty_blocks_until_drained() {
        let registry = Arc::new(ClientRegistry::new());
        let (a, _rx_a) = registry.register();
        let (b, _rx_b) = registry.register();

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.wait_until_empty().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        registry.unregister(a);
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        registry.unregister(b);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish after drain")
            .unwrap();
    }

    #[tokio::test]
    async fn shutdown_all_signals_every_session() {
        let registry = ClientRegistry::new();
        let (_a, mut rx_a) = registry.register();
        let (_b, mut rx_b) = registry.register();
        registry.shutdown_all();
        assert!(rx_a.changed().await.is_ok());
        assert!(*rx_a.borrow());
        assert!(rx_b.changed().await.is_ok());
        assert!(*rx_b.borrow());
    }
}
