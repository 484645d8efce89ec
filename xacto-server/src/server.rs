//! The accept loop and shutdown driver.

use std::net::SocketAddr;
use std::sync::Arc;

use log::{error, info};
use tokio::net::{TcpListener, ToSocketAddrs};

use xacto::error::CResult;
use xacto::store::Store;
use xacto::transaction::TransactionManager;

use crate::registry::ClientRegistry;
use crate::session;

/// Accepts client connections and spawns one session task per client.
pub struct Server {
    listener: TcpListener,
    store: Arc<Store>,
    manager: Arc<TransactionManager>,
    registry: Arc<ClientRegistry>,
}

impl Server {
    pub async fn bind<A: ToSocketAddrs>(
        addr: A,
        store: Arc<Store>,
        manager: Arc<TransactionManager>,
        registry: Arc<ClientRegistry>,
    ) -> CResult<Server> {
        let listener = TcpListener::bind(addr).await?;
        info!("listening on {}", listener.local_addr()?);
        Ok(Server { listener, store, manager, registry })
    }

    pub fn local_addr(&self) -> CResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the accept loop. Never returns; stop it by dropping or
    /// aborting the task and driving [`terminate`].
    pub async fn serve(&self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    tokio::spawn(session::serve_client(
                        stream,
                        peer,
                        Arc::clone(&self.store),
                        Arc::clone(&self.manager),
                        Arc::clone(&self.registry),
                    ));
                }
                Err(err) => error!("accept failed: {}", err),
            }
        }
    }
}

/// Drive a clean shutdown: ask every session to stop, wait for the
/// registry to drain, and log a final summary.
pub async fn terminate(
    registry: &ClientRegistry,
    store: &Store,
    manager: &TransactionManager,
) {
    registry.shutdown_all();
    registry.wait_until_empty().await;
    info!("all client sessions terminated");
    info!(
        "store holds {} key(s) and {} version(s); {} transaction(s) begun, {} still referenced",
        store.key_count(),
        store.version_count(),
        manager.created(),
        manager.active()
    );
}
