//! Synchro server binary.
//!
//! # Usage
//!
//! ```bash
//! # Serve the extension on the default port
//! synchro-server --bind 127.0.0.1:6000
//!
//! # Match the codes a display server assigned to the extension
//! synchro-server --major-opcode 134 --event-base 83 --error-base 148
//! ```

use clap::Parser;
use synchro_core::ExtensionConfig;
use synchro_server::{DEFAULT_MAX_REQUEST_BYTES, Server, ServerRuntimeConfig};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// SYNC extension server
#[derive(Parser, Debug)]
#[command(name = "synchro-server")]
#[command(about = "Display protocol SYNC extension server")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "127.0.0.1:6000")]
    bind: String,

    /// Major opcode routed to the extension
    #[arg(long, default_value_t = ExtensionConfig::default().major_opcode)]
    major_opcode: u8,

    /// First event code of the extension
    #[arg(long, default_value_t = ExtensionConfig::default().event_base)]
    event_base: u8,

    /// Error code reported for unknown counters and fences
    #[arg(long, default_value_t = ExtensionConfig::default().error_base)]
    error_base: u8,

    /// Largest request accepted, in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_REQUEST_BYTES)]
    max_request_bytes: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Synchro server starting");
    tracing::info!("Binding to {}", args.bind);

    let config = ServerRuntimeConfig {
        bind_address: args.bind,
        extension: ExtensionConfig {
            major_opcode: args.major_opcode,
            event_base: args.event_base,
            error_base: args.error_base,
        },
        max_request_bytes: args.max_request_bytes,
    };

    let server = Server::bind(config).await?;

    tracing::info!("Server listening on {}", server.local_addr()?);

    server.run().await?;

    Ok(())
}
