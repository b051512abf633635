use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::config::ServerConfig;
use crate::connection::handle_connection;
use crate::hub::Hub;

/// Bound session listener plus the shared room registry.
pub struct Server {
    listener: TcpListener,
    hub: Hub,
    config: Arc<ServerConfig>,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let hub = Hub::new(config.max_clients_per_room, config.limits);
        Ok(Self {
            listener,
            hub,
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn hub(&self) -> Hub {
        self.hub.clone()
    }

    /// Accept clients until `shutdown` resolves.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("Shutting down session listener");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!(%peer, "Accepted connection");
                        tokio::spawn(handle_connection(
                            stream,
                            peer,
                            self.hub.clone(),
                            self.config.clone(),
                        ));
                    }
                    Err(e) => tracing::warn!(error = %e, "Accept failed"),
                },
            }
        }
    }
}
