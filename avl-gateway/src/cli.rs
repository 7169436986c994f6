//! Command line arguments

use avl::server::ServerConfig;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "avl-gateway", version, about = "Teltonika AVL Codec 8 gateway")]
pub struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "AVL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to accept device connections on
    #[arg(short, long, env = "AVL_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Collector URL receiving one JSON POST per record
    #[arg(long, env = "AVL_SINK_URL")]
    pub sink_url: Option<String>,

    /// Seconds without data before a device is dropped (0 disables)
    #[arg(long, env = "AVL_IDLE_TIMEOUT")]
    pub idle_timeout: Option<u64>,

    /// Log filter, e.g. `info` or `avl_server=debug`
    #[arg(long, env = "AVL_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Cli {
    /// Apply command line overrides on top of `config`
    pub fn apply(&self, mut config: ServerConfig) -> ServerConfig {
        if let Some(address) = self.listen {
            config = config.with_listen_address(address);
        }
        if let Some(url) = &self.sink_url {
            config = config.with_sink_url(url.clone());
        }
        if let Some(secs) = self.idle_timeout {
            config = config.with_idle_timeout((secs > 0).then(|| Duration::from_secs(secs)));
        }
        config
    }
}
