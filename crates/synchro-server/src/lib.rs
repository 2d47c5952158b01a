//! Synchro production server.
//!
//! Hosts the SYNC extension behind a plain TCP listener:
//! - Tokio for the async runtime, one task per connection
//! - System time as the extension's clock
//! - The display protocol's 4-byte request header for framing
//!
//! ## Architecture
//!
//! ```text
//! synchro-server
//!   ├─ SystemEnv          (production Environment impl)
//!   ├─ framing            (request header + body reader)
//!   ├─ connection         (reader task, request loop, serialized writer)
//!   └─ SyncExtension      (shared registries, from synchro-core)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod connection;
mod error;
pub mod framing;
mod system_env;

use std::sync::Arc;

pub use connection::{ConnectionWriter, handle_connection};
pub use error::ServerError;
pub use framing::{Inbound, RequestHeader, read_request};
use synchro_core::{ExtensionConfig, SyncExtension};
pub use system_env::SystemEnv;
use tokio::net::{TcpListener, TcpStream};

/// Largest request accepted by default, header included.
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 256 * 1024;

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "127.0.0.1:6000")
    pub bind_address: String,
    /// Codes assigned to the extension
    pub extension: ExtensionConfig,
    /// Largest request accepted, header included; longer ones get a Length error
    pub max_request_bytes: usize,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:6000".to_string(),
            extension: ExtensionConfig::default(),
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
        }
    }
}

/// Production Synchro server.
pub struct Server {
    /// Shared extension state
    extension: Arc<SyncExtension<SystemEnv>>,
    /// TCP listener
    listener: TcpListener,
    /// Request size limit
    max_request_bytes: usize,
}

impl Server {
    /// Create and bind a new server.
    ///
    /// Installs the extension, which resets SERVERTIME to zero.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The size limit cannot hold a request header
    /// - Binding to the address fails
    pub async fn bind(config: ServerRuntimeConfig) -> Result<Self, ServerError> {
        if config.max_request_bytes < RequestHeader::SIZE {
            return Err(ServerError::Config(format!(
                "max request size {} is smaller than a request header",
                config.max_request_bytes
            )));
        }

        let listener = TcpListener::bind(&config.bind_address).await?;
        let extension = Arc::new(SyncExtension::initialize(SystemEnv::new(), config.extension));

        Ok(Self { extension, listener, max_request_bytes: config.max_request_bytes })
    }

    /// Run the server, accepting connections until the task is dropped.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!("Server starting on {}", self.local_addr()?);

        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let extension = Arc::clone(&self.extension);
                    let max_request_bytes = self.max_request_bytes;

                    tokio::spawn(async move {
                        if let Err(e) = serve(stream, peer, extension, max_request_bytes).await {
                            tracing::error!("Connection error: {}", e);
                        }
                    });
                },
                Err(e) => {
                    tracing::error!("Accept error: {}", e);
                },
            }
        }
    }

    /// Get the local address the server is bound to.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Shared extension state.
    pub fn extension(&self) -> &Arc<SyncExtension<SystemEnv>> {
        &self.extension
    }
}

/// Handle a single TCP connection.
async fn serve(
    stream: TcpStream,
    peer: std::net::SocketAddr,
    extension: Arc<SyncExtension<SystemEnv>>,
    max_request_bytes: usize,
) -> Result<(), ServerError> {
    let conn_id = {
        let mut buf = [0u8; 8];
        getrandom::fill(&mut buf).map_err(|e| ServerError::Internal(e.to_string()))?;
        u64::from_le_bytes(buf)
    };

    tracing::debug!(conn_id, %peer, "New connection");

    stream.set_nodelay(true)?;
    let (reader, writer) = stream.into_split();
    handle_connection(conn_id, reader, writer, extension, max_request_bytes).await
}
