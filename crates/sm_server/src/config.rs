//! Server configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Per-frame write deadline on the push stream.
pub const WRITE_DEADLINE: Duration = Duration::from_secs(10);

/// Deadline for each store query issued by the delivery loop.
pub const STORE_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Parser)]
#[command(name = "sm-server", about = "SecuMSG envelope delivery server")]
pub struct ServerConfig {
    /// Socket address to listen on.
    #[arg(long, env = "SM_BIND", default_value = "127.0.0.1:8080")]
    pub bind: SocketAddr,

    /// SQLite database path.
    #[arg(long, env = "SM_DATABASE", default_value = "secumsg.db")]
    pub database: PathBuf,

    /// Delivery poll interval in milliseconds.
    #[arg(long, env = "SM_POLL_INTERVAL_MS", default_value_t = 500)]
    pub poll_interval_ms: u64,

    /// Maximum envelopes pushed per poll tick.
    #[arg(long, env = "SM_DELIVERY_BATCH", default_value_t = 100)]
    pub delivery_batch: i64,
}

impl ServerConfig {
    /// The configured poll interval, bounded below at 1 ms.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}
