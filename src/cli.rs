//! Command line interface for the duplexwire echo server.
//!
//! Provides the argument parser used by the binary and by the build script
//! for man page generation.

use std::net::SocketAddr;

use clap::Parser;

/// Command line arguments for the `duplexwire` binary.
#[derive(Debug, Parser)]
#[command(
    name = "duplexwire",
    version,
    about = "Framed echo server built on duplexwire"
)]
pub struct Cli {
    /// Address to accept connections on.
    #[arg(short, long, default_value = "127.0.0.1:9001")]
    pub listen: SocketAddr,
    /// Largest inbound message in bytes.
    #[arg(long, default_value_t = 64 * 1024)]
    pub max_message_size: usize,
    /// Close sessions idle for this many milliseconds.
    #[arg(long)]
    pub idle_timeout_ms: Option<u64>,
    /// Expose Prometheus metrics on this address.
    #[arg(long)]
    pub prometheus: Option<SocketAddr>,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::Cli;

    #[test]
    fn parses_defaults() {
        let cli = Cli::parse_from(["duplexwire"]);
        assert_eq!(cli.listen.port(), 9001);
        assert_eq!(cli.max_message_size, 64 * 1024);
        assert!(cli.idle_timeout_ms.is_none());
    }

    #[test]
    fn parses_idle_timeout() {
        let cli = Cli::parse_from(["duplexwire", "--idle-timeout-ms", "2500"]);
        assert_eq!(cli.idle_timeout_ms, Some(2500));
    }
}
