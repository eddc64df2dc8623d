use hangar_util::config::Config;

pub(crate) fn test_config() -> Config {
	Config {
		block_size: 1024,
		replication_factor: 2,
		heartbeat_interval_sec: 10,
		heartbeat_timeout_factor: 3,
		coordinator: None,
		storage_node: None,
	}
}
