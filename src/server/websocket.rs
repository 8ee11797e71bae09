//! # WebSocket Server
//!
//! Accept loop for the subscription endpoint. Each accepted socket gets its
//! own connection task; the engine is shared.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::engine::SubscriptionEngine;

use super::connection::{run_connection, ConnectionSettings};
use super::errors::{ServerError, ServerResult};

/// WebSocket server for real-time subscriptions.
pub struct WebSocketServer {
    engine: Arc<SubscriptionEngine>,
    settings: ConnectionSettings,
    listener: TcpListener,
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
}

impl std::fmt::Debug for WebSocketServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketServer")
            .field("settings", &self.settings)
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

impl WebSocketServer {
    /// Bind the listener. The server does not accept until [`run`] is
    /// called.
    ///
    /// [`run`]: WebSocketServer::run
    pub async fn bind(config: &ServerConfig, engine: Arc<SubscriptionEngine>) -> ServerResult<Self> {
        let addr: SocketAddr = config
            .bind_addr
            .parse()
            .map_err(|_| ServerError::InvalidBindAddr(config.bind_addr.clone()))?;

        let listener = TcpListener::bind(&addr).await.map_err(|e| ServerError::Bind {
            addr: config.bind_addr.clone(),
            source: e,
        })?;

        let local_addr = listener.local_addr().map_err(|e| ServerError::Bind {
            addr: config.bind_addr.clone(),
            source: e,
        })?;

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            engine,
            settings: ConnectionSettings {
                keepalive_interval: Duration::from_secs(config.keepalive_interval_secs),
                init_timeout: Duration::from_secs(config.init_timeout_secs),
                outbound_queue_capacity: config.outbound_queue_capacity,
                slow_consumer_window: Duration::from_secs(config.slow_consumer_window_secs),
            },
            listener,
            local_addr,
            shutdown_tx,
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until shutdown.
    pub async fn run(&self) -> ServerResult<()> {
        info!(addr = %self.local_addr, "subscription server listening");

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => {
                            let engine = Arc::clone(&self.engine);
                            let settings = self.settings.clone();

                            tokio::spawn(async move {
                                if let Err(err) =
                                    run_connection(stream, peer_addr, engine, settings).await
                                {
                                    error!(peer = %peer_addr, error = %err, "connection failed");
                                }
                            });
                        }
                        Err(err) => {
                            error!(error = %err, "accept failed");
                        }
                    }
                }

                _ = shutdown_rx.recv() => {
                    info!("subscription server shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Signal the accept loop to stop
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::schema::SubscriptionSchema;

    fn test_engine() -> Arc<SubscriptionEngine> {
        let bus = Arc::new(EventBus::new());
        let (_, subscriber) = crate::bus::split(&bus);
        Arc::new(SubscriptionEngine::new(
            subscriber,
            Arc::new(SubscriptionSchema::builtin()),
            100,
        ))
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            ..ServerConfig::default()
        };

        let server = WebSocketServer::bind(&config, test_engine()).await.unwrap();
        assert_ne!(server.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn test_bind_rejects_bad_address() {
        let config = ServerConfig {
            bind_addr: "not-an-address".to_string(),
            ..ServerConfig::default()
        };

        let err = WebSocketServer::bind(&config, test_engine()).await.unwrap_err();
        assert!(matches!(err, ServerError::InvalidBindAddr(_)));
    }
}
