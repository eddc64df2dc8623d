use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use hangar_api::CoordinatorApiServer;
use hangar_block::StorageNode;
use hangar_model::MetadataStore;
use hangar_util::config::read_config;
use hangar_util::error::{Error, OkOrMessage};
use hangar_util::shutdown::{await_shutdown, shutdown_on_signals};

pub async fn run_coordinator(config_file: PathBuf) -> Result<(), Error> {
	info!("Loading configuration...");
	let config = read_config(config_file)?;
	let coordinator_config = config
		.coordinator
		.clone()
		.ok_or_message("configuration has no [coordinator] section")?;

	info!("Opening metadata store...");
	let metadata = MetadataStore::open(&coordinator_config.metadata_db, &config)
		.map_err(|e| Error::Message(e.to_string()))?;
	// settle liveness state left over from before the restart
	metadata
		.reap_offline_nodes()
		.map_err(|e| Error::Message(e.to_string()))?;

	let exit_rx = shutdown_on_signals();

	info!("Starting liveness sweep...");
	tokio::spawn(reaper_loop(
		metadata.clone(),
		Duration::from_secs(config.heartbeat_interval_sec),
		exit_rx.clone(),
	));

	info!("Starting control API server...");
	let server = CoordinatorApiServer::new(metadata);
	server
		.run(coordinator_config.bind_addr, await_shutdown(exit_rx))
		.await?;

	info!("Coordinator exited.");
	Ok(())
}

pub async fn run_storage_node(config_file: PathBuf) -> Result<(), Error> {
	info!("Loading configuration...");
	let config = read_config(config_file)?;

	info!("Starting storage node...");
	let node = StorageNode::new(&config).await?;

	let exit_rx = shutdown_on_signals();
	node.run(exit_rx).await?;

	info!("Storage node exited.");
	Ok(())
}

/// Periodic sweep marking silent nodes inactive. Correctness does not
/// depend on it (the reaper also runs inside every active-set read), it
/// just keeps the logs honest about cluster health.
async fn reaper_loop(
	metadata: Arc<MetadataStore>,
	interval: Duration,
	mut must_exit: watch::Receiver<bool>,
) {
	while !*must_exit.borrow() {
		tokio::select! {
			_ = tokio::time::sleep(interval) => (),
			_ = must_exit.changed() => continue,
		}
		if let Err(e) = metadata.reap_offline_nodes() {
			error!("liveness sweep failed: {}", e);
		}
	}
}
