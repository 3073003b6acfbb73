use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "tether")]
#[command(about = "Tether - drive a connected browser from server-side Rust")]
#[command(version)]
pub struct ServerConfig {
	/// Address to listen on
	#[arg(long, env = "TETHER_HOST", default_value = "127.0.0.1")]
	pub host: String,

	/// Port to listen on
	#[arg(short, long, env = "TETHER_PORT", default_value_t = 8023)]
	pub port: u16,

	/// Directory of static files served for every non-WebSocket path
	#[arg(long, env = "TETHER_STATIC_ROOT", value_name = "DIR")]
	pub static_root: Option<PathBuf>,

	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, action = clap::ArgAction::Count)]
	pub verbose: u8,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self {
			host: "127.0.0.1".to_string(),
			port: 8023,
			static_root: None,
			verbose: 0,
		}
	}
}

impl ServerConfig {
	pub fn addr(&self) -> Result<SocketAddr> {
		format!("{}:{}", self.host, self.port)
			.parse()
			.with_context(|| format!("Invalid host/port combination: {}:{}", self.host, self.port))
	}
}
