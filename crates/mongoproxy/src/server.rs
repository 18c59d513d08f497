//! Proxy acceptor and embedder API

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{debug, error, info};

use mongoproxy_common::config::{Config, DEFAULT_UPSTREAM_PORT};
use mongoproxy_common::error::{Error, Result};
use mongoproxy_protocol::document::Document;

use crate::registry::ListenerRegistry;
use crate::relay::{ConnectionRelay, RelaySettings};

/// Transparent proxy in front of one upstream database server
pub struct ProxyServer {
    config: Config,
    registry: Arc<ListenerRegistry>,
}

impl ProxyServer {
    /// Listen on `listen_port` and relay to `upstream_host:upstream_port`
    pub fn new(listen_port: u16, upstream_host: &str, upstream_port: u16) -> Self {
        let mut config = Config::default();
        config.server.port = listen_port;
        config.upstream.host = upstream_host.to_string();
        config.upstream.port = upstream_port;
        Self::from_config(&config)
    }

    /// Relay to the database on the local machine's standard port
    pub fn with_default_upstream(listen_port: u16) -> Self {
        Self::new(listen_port, "127.0.0.1", DEFAULT_UPSTREAM_PORT)
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            config: config.clone(),
            registry: Arc::new(ListenerRegistry::new()),
        }
    }

    /// Set the bind address
    pub fn bind_address(mut self, address: &str) -> Self {
        self.config.server.bind_address = address.to_string();
        self
    }

    /// Call `handler` with every document inserted into `database.collection`
    pub fn add_listener<F>(&self, database: &str, collection: &str, handler: F)
    where
        F: Fn(&Document) + Send + Sync + 'static,
    {
        self.registry.register(database, collection, handler);
    }

    pub fn registry(&self) -> Arc<ListenerRegistry> {
        self.registry.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Bind the configured address and serve forever
    pub async fn run(&self) -> Result<()> {
        let addr = self.config.server.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Internal(format!("Failed to bind {}: {}", addr, e)))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let settings = Arc::new(RelaySettings::from_config(&self.config));
        let local = listener.local_addr()?;

        info!("Proxy listening on {}", local);
        info!("Relaying to upstream {}", settings.upstream_addr);
        for key in self.registry.keys() {
            info!(
                "Watching {} ({} listener(s))",
                key,
                self.registry.listener_count(&key)
            );
        }

        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    debug!("New connection from {}", peer_addr);
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("Could not disable Nagle for {}: {}", peer_addr, e);
                    }
                    self.spawn_relay(peer_addr, stream, &settings);
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }

    fn spawn_relay(
        &self,
        peer_addr: SocketAddr,
        stream: tokio::net::TcpStream,
        settings: &Arc<RelaySettings>,
    ) {
        let relay = ConnectionRelay::new(peer_addr, self.registry.clone(), settings.clone());
        tokio::spawn(relay.run(stream));
    }
}

impl std::fmt::Debug for ProxyServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyServer")
            .field("listen", &self.config.server.listen_addr())
            .field("upstream", &self.config.upstream.addr())
            .field("registry", &self.registry)
            .finish()
    }
}
