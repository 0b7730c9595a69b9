//! Command-line configuration for the relay server.

use crate::match_manager::{MatchSettings, DEFAULT_MAX_MATCHES};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "pong_server",
    about = "Pairs game hosts with clients and relays their messages"
)]
pub struct Config {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub bind: SocketAddr,

    /// Most matches that may be pending or running at once.
    #[arg(long, default_value_t = DEFAULT_MAX_MATCHES)]
    pub max_matches: usize,

    /// Close a host that has waited this many seconds without a client.
    #[arg(long)]
    pub await_timeout_secs: Option<u64>,

    /// Directory of static files served outside `/sock` and `/stats`.
    #[arg(long)]
    pub static_dir: Option<PathBuf>,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    pub log_filter: String,
}

impl Config {
    pub fn settings(&self) -> MatchSettings {
        MatchSettings {
            max_matches: self.max_matches,
            await_timeout: self.await_timeout_secs.map(Duration::from_secs),
        }
    }
}
