//! Contains type and functions related to Hangar configuration file
use std::io::Read;
use std::net::SocketAddr;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::Error;

/// Represent the whole configuration
#[derive(Deserialize, Debug, Clone)]
pub struct Config {
	/// Size of data blocks, in bytes
	#[serde(default = "default_block_size")]
	pub block_size: u64,

	/// Number of replicas kept for each block (primary included)
	#[serde(default = "default_replication_factor")]
	pub replication_factor: usize,

	/// Interval between two heartbeats sent by a storage node, in seconds
	#[serde(default = "default_heartbeat_interval_sec")]
	pub heartbeat_interval_sec: u64,

	/// Number of missed heartbeat intervals after which a storage node is
	/// considered offline
	#[serde(default = "default_heartbeat_timeout_factor")]
	pub heartbeat_timeout_factor: u64,

	/// Configuration of the coordinator role
	pub coordinator: Option<CoordinatorConfig>,

	/// Configuration of the storage node role
	pub storage_node: Option<StorageNodeConfig>,
}

/// Configuration of the coordinator (metadata server)
#[derive(Deserialize, Debug, Clone)]
pub struct CoordinatorConfig {
	/// Address and port to bind for the control API
	pub bind_addr: SocketAddr,

	/// Path of the SQLite metadata database
	pub metadata_db: PathBuf,
}

/// Configuration of a storage node
#[derive(Deserialize, Debug, Clone)]
pub struct StorageNodeConfig {
	/// Identifier of this node, unique in the cluster
	pub node_id: String,

	/// Address and port to bind for the data channel
	pub bind_addr: SocketAddr,

	/// Address and port to bind for the admin channel
	pub admin_bind_addr: SocketAddr,

	/// Data-channel address advertised to the coordinator and reachable by
	/// clients and peer nodes; defaults to the bound address
	pub public_addr: Option<String>,

	/// Admin-channel URL advertised to the coordinator; defaults to the
	/// bound address
	pub admin_public_addr: Option<String>,

	/// Directory in which block payloads are stored
	pub data_dir: PathBuf,

	/// Base URL of the coordinator control API
	pub coordinator: String,
}

impl Config {
	/// Liveness window: a node missing heartbeats for longer than this is
	/// excluded from placement and reads
	pub fn node_timeout_msec(&self) -> u64 {
		self.heartbeat_interval_sec * self.heartbeat_timeout_factor * 1000
	}
}

fn default_block_size() -> u64 {
	1048576
}
fn default_replication_factor() -> usize {
	2
}
fn default_heartbeat_interval_sec() -> u64 {
	10
}
fn default_heartbeat_timeout_factor() -> u64 {
	3
}

/// Read and parse configuration, then apply environment overrides
pub fn read_config(config_file: PathBuf) -> Result<Config, Error> {
	let mut file = std::fs::OpenOptions::new()
		.read(true)
		.open(config_file.as_path())?;

	let mut config = String::new();
	file.read_to_string(&mut config)?;

	let mut config: Config = toml::from_str(&config)?;
	apply_env_overrides(&mut config)?;
	Ok(config)
}

/// The common tunables can be overridden from the environment, which takes
/// precedence over the configuration file
fn apply_env_overrides(config: &mut Config) -> Result<(), Error> {
	if let Some(v) = env_parse::<u64>("BLOCK_SIZE_BYTES")? {
		config.block_size = v;
	}
	if let Some(v) = env_parse::<usize>("REPLICATION_FACTOR")? {
		config.replication_factor = v;
	}
	if let Some(v) = env_parse::<u64>("HEARTBEAT_INTERVAL_SEC")? {
		config.heartbeat_interval_sec = v;
	}
	if let Some(v) = env_parse::<u64>("HEARTBEAT_TIMEOUT_FACTOR")? {
		config.heartbeat_timeout_factor = v;
	}
	Ok(())
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Result<Option<T>, Error> {
	match std::env::var(var) {
		Ok(val) => val
			.parse::<T>()
			.map(Some)
			.map_err(|_| Error::Message(format!("invalid value for {}: `{}`", var, val))),
		Err(_) => Ok(None),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_minimal() {
		let config: Config = toml::from_str(
			r#"
			[coordinator]
			bind_addr = "127.0.0.1:5000"
			metadata_db = "/tmp/meta.db"
			"#,
		)
		.unwrap();
		assert_eq!(config.block_size, 1048576);
		assert_eq!(config.replication_factor, 2);
		assert_eq!(config.heartbeat_interval_sec, 10);
		assert_eq!(config.heartbeat_timeout_factor, 3);
		assert_eq!(config.node_timeout_msec(), 30_000);
		assert!(config.storage_node.is_none());
		assert_eq!(
			config.coordinator.unwrap().bind_addr,
			"127.0.0.1:5000".parse().unwrap()
		);
	}

	#[test]
	fn test_parse_storage_node() {
		let config: Config = toml::from_str(
			r#"
			block_size = 4096
			replication_factor = 3

			[storage_node]
			node_id = "node-1"
			bind_addr = "0.0.0.0:50051"
			admin_bind_addr = "0.0.0.0:5001"
			data_dir = "/var/lib/hangar/blocks"
			coordinator = "http://localhost:5000"
			"#,
		)
		.unwrap();
		assert_eq!(config.block_size, 4096);
		assert_eq!(config.replication_factor, 3);
		let node = config.storage_node.unwrap();
		assert_eq!(node.node_id, "node-1");
		assert!(node.public_addr.is_none());
	}

	// the only test touching this environment variable
	#[test]
	fn test_env_override() {
		let mut config: Config = toml::from_str("block_size = 4096").unwrap();
		std::env::set_var("BLOCK_SIZE_BYTES", "2048");
		apply_env_overrides(&mut config).unwrap();
		std::env::remove_var("BLOCK_SIZE_BYTES");
		assert_eq!(config.block_size, 2048);

		std::env::set_var("BLOCK_SIZE_BYTES", "not-a-number");
		let res = apply_env_overrides(&mut config);
		std::env::remove_var("BLOCK_SIZE_BYTES");
		assert!(res.is_err());
	}
}
