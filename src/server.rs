//! TCP accept loop.
//!
//! One task per accepted connection, no state shared between them beyond
//! the `Arc`'d service registry. Callers that bring their own transport
//! (TLS, unix sockets, tests) skip this module entirely and call
//! [`serve_connection`](crate::serve_connection) themselves.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::proto::{serve_connection, ConnConfig};
use crate::service::{IcapService, ServiceOptions, ServiceRegistry};
use crate::{Result, DEFAULT_ICAP_PORT};

/// A running ICAP server bound to a TCP listener.
pub struct Server {
    listener: TcpListener,
    services: Arc<ServiceRegistry>,
    config: ConnConfig,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }

    /// The address the server actually bound, useful with port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever, spawning one task per connection.
    pub async fn run(self) -> Result<()> {
        info!(addr = %self.listener.local_addr()?, "ICAP server listening");
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    continue;
                }
            };
            let services = self.services.clone();
            let config = self.config.clone();
            tokio::spawn(async move {
                debug!(%peer, "connection accepted");
                match serve_connection(stream, services, config).await {
                    Ok(()) => debug!(%peer, "connection closed"),
                    Err(err) => debug!(%peer, error = %err, "connection closed with error"),
                }
            });
        }
    }
}

/// Builder for [`Server`].
pub struct ServerBuilder {
    addr: String,
    listener: Option<TcpListener>,
    services: ServiceRegistry,
    config: ConnConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self {
            addr: format!("127.0.0.1:{DEFAULT_ICAP_PORT}"),
            listener: None,
            services: ServiceRegistry::new(),
            config: ConnConfig::default(),
        }
    }
}

impl ServerBuilder {
    /// Address to bind, `127.0.0.1:1344` by default.
    pub fn bind(mut self, addr: impl Into<String>) -> Self {
        self.addr = addr.into();
        self
    }

    /// Use an already-bound listener instead of binding in `build`.
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Register an adaptation service under a service path.
    pub fn add_service<S>(
        mut self,
        path: impl AsRef<str>,
        options: ServiceOptions,
        service: S,
    ) -> Self
    where
        S: IcapService + 'static,
    {
        self.services.register(path, options, service);
        self
    }

    /// Per-connection limits and timeouts.
    pub fn conn_config(mut self, config: ConnConfig) -> Self {
        self.config = config;
        self
    }

    pub async fn build(self) -> Result<Server> {
        let listener = match self.listener {
            Some(listener) => listener,
            None => TcpListener::bind(&self.addr).await?,
        };
        Ok(Server {
            listener,
            services: Arc::new(self.services),
            config: self.config,
        })
    }
}
