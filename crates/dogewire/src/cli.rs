use std::time::Duration;

use clap::Parser;
use dogewire_core::electrum::{ClientOptions, ConnectionTarget, Transport};
use dogewire_core::Network;

/// Dogewire: Dogecoin wallet backend over an upstream Electrum server.
#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    /// Electrum server host.
    #[arg(long, default_value = "electrum1.cipig.net", env = "DOGEWIRE_ELECTRUM_HOST")]
    pub electrum_host: String,

    /// Electrum server port.
    #[arg(long, default_value = "20060", env = "DOGEWIRE_ELECTRUM_PORT")]
    pub electrum_port: u16,

    /// Electrum transport: `tcp` or `tls` (`ssl` is accepted).
    #[arg(long, default_value = "tls", env = "DOGEWIRE_ELECTRUM_TRANSPORT")]
    pub electrum_transport: Transport,

    /// Dogecoin network: `dogecoin` or `testnet`.
    #[arg(long, default_value = "dogecoin", env = "DOGEWIRE_NETWORK")]
    pub network: Network,

    /// Verify the Electrum server certificate against webpki roots.
    #[arg(long, env = "DOGEWIRE_VERIFY_TLS")]
    pub verify_tls: bool,

    /// Seconds to wait for the Electrum socket to open.
    #[arg(long, default_value = "10")]
    pub connect_timeout_secs: u64,

    /// Upper bound on upstream requests per second (unlimited if omitted).
    #[arg(long, env = "DOGEWIRE_REQUESTS_PER_SECOND")]
    pub requests_per_second: Option<u32>,

    /// Address to bind the web server to.
    #[arg(long, default_value = "127.0.0.1")]
    pub bind: String,

    /// Port to listen on.
    #[arg(long, default_value = "5000")]
    pub port: u16,
}

impl Cli {
    pub fn target(&self) -> ConnectionTarget {
        ConnectionTarget::new(self.electrum_host.clone(), self.electrum_port, self.electrum_transport)
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            verify_tls: self.verify_tls,
            requests_per_second: self.requests_per_second,
            ..ClientOptions::default()
        }
    }
}
