//! Server configuration
//!
//! Parsed from the command line with clap; `Config::default()` gives the
//! same values for library use and tests.

use std::time::Duration;

use clap::Parser;

use crate::connection::DEFAULT_QUEUE_CAPACITY;

/// Room-based TCP chat server
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on. Use 0 for an ephemeral port.
    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    /// Outbound queue capacity per client, in frames
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// Seconds to wait on request/response round trips
    #[arg(long, default_value_t = 5)]
    pub request_timeout_secs: u64,
}

impl Config {
    /// `host:port` string to bind the listener to
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            request_timeout_secs: 5,
        }
    }
}
