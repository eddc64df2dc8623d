//! In-process test cluster: one coordinator and a few storage nodes on
//! loopback ports, driven through the SDK.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use hangar_api::CoordinatorApiServer;
use hangar_block::StorageNode;
use hangar_client::DfsClient;
use hangar_model::MetadataStore;
use hangar_util::config::{Config, StorageNodeConfig};
use hangar_util::shutdown::await_shutdown;

// Each test takes ports from here so parallel tests never collide
static PORT_ALLOC: AtomicU16 = AtomicU16::new(41000);

fn reserve_ports(n: u16) -> u16 {
	PORT_ALLOC.fetch_add(n, Ordering::SeqCst)
}

pub struct TestNode {
	pub node_id: String,
	pub data_addr: String,
	pub data_dir: PathBuf,
	stop: watch::Sender<bool>,
	pub alive: bool,
}

pub struct TestCluster {
	pub client: DfsClient,
	pub coordinator_url: String,
	pub metadata: Arc<MetadataStore>,
	pub nodes: Vec<TestNode>,
	pub config: Config,

	// dropping this tears the whole temp tree down
	_tmp: mktemp::Temp,
	stop_coordinator: watch::Sender<bool>,
}

impl TestCluster {
	/// A cluster with a 1 s heartbeat and a 2-interval liveness window, so
	/// liveness transitions happen on a test-friendly clock
	pub async fn new(n_nodes: usize) -> Self {
		let tmp = mktemp::Temp::new_dir().unwrap();
		let config = Config {
			block_size: 1024 * 1024,
			replication_factor: 2,
			heartbeat_interval_sec: 1,
			heartbeat_timeout_factor: 2,
			coordinator: None,
			storage_node: None,
		};

		let metadata =
			MetadataStore::open(&tmp.to_path_buf().join("meta.db"), &config).unwrap();

		let (stop_coordinator, stop_rx) = watch::channel(false);
		let api = CoordinatorApiServer::new(metadata.clone());
		let bind_addr = format!("127.0.0.1:{}", reserve_ports(1)).parse().unwrap();
		let (addr, server) = api.bind(bind_addr, await_shutdown(stop_rx)).unwrap();
		tokio::spawn(server);
		let coordinator_url = format!("http://{}", addr);

		let mut cluster = Self {
			client: DfsClient::new(&coordinator_url),
			coordinator_url,
			metadata,
			nodes: vec![],
			config,
			_tmp: tmp,
			stop_coordinator,
		};
		for _ in 0..n_nodes {
			cluster.spawn_node().await;
		}
		cluster.wait_for_active_nodes(n_nodes).await;
		cluster
	}

	pub async fn spawn_node(&mut self) -> String {
		let i = self.nodes.len();
		let base_port = reserve_ports(2);
		let node_id = format!("node{}", i);
		let data_addr = format!("127.0.0.1:{}", base_port);
		let data_dir = self._tmp.to_path_buf().join(format!("blocks_{}", node_id));

		let mut config = self.config.clone();
		config.storage_node = Some(StorageNodeConfig {
			node_id: node_id.clone(),
			bind_addr: data_addr.parse().unwrap(),
			admin_bind_addr: format!("127.0.0.1:{}", base_port + 1).parse().unwrap(),
			public_addr: Some(data_addr.clone()),
			admin_public_addr: Some(format!("http://127.0.0.1:{}", base_port + 1)),
			data_dir: data_dir.clone(),
			coordinator: self.coordinator_url.clone(),
		});

		let node = StorageNode::new(&config).await.unwrap();
		let (stop, stop_rx) = watch::channel(false);
		tokio::spawn(async move {
			if let Err(e) = node.run(stop_rx).await {
				error!("test node exited with error: {}", e);
			}
		});

		self.nodes.push(TestNode {
			node_id,
			data_addr: data_addr.clone(),
			data_dir,
			stop,
			alive: true,
		});
		data_addr
	}

	/// Stop the node serving the given data address
	pub fn kill_node(&mut self, data_addr: &str) {
		let node = self
			.nodes
			.iter_mut()
			.find(|n| n.data_addr == data_addr)
			.expect("no test node with this address");
		node.stop.send(true).unwrap();
		node.alive = false;
	}

	pub async fn wait_for_active_nodes(&self, n: usize) {
		for _ in 0..200 {
			if self.metadata.active_nodes().unwrap().len() == n {
				return;
			}
			tokio::time::sleep(Duration::from_millis(50)).await;
		}
		panic!("nodes did not reach the expected liveness state in time");
	}

	/// Total number of block files across every node's data directory
	pub fn stored_block_count(&self) -> usize {
		self.nodes
			.iter()
			.map(|n| match std::fs::read_dir(&n.data_dir) {
				Ok(entries) => entries.count(),
				Err(_) => 0,
			})
			.sum()
	}

	/// How long a silent node stays in the active set
	pub fn liveness_window(&self) -> Duration {
		Duration::from_millis(self.config.node_timeout_msec())
	}
}

impl Drop for TestCluster {
	fn drop(&mut self) {
		let _ = self.stop_coordinator.send(true);
		for node in self.nodes.iter() {
			let _ = node.stop.send(true);
		}
	}
}

/// A local scratch file filled with reproducible-but-varied bytes
pub async fn make_local_file(dir: &std::path::Path, name: &str, size: usize) -> PathBuf {
	use rand::prelude::*;
	let mut data = vec![0u8; size];
	rand::thread_rng().fill_bytes(&mut data);
	let path = dir.join(name);
	tokio::fs::write(&path, &data).await.unwrap();
	path
}

pub async fn assert_same_content(a: &std::path::Path, b: &std::path::Path) {
	let ca = tokio::fs::read(a).await.unwrap();
	let cb = tokio::fs::read(b).await.unwrap();
	assert_eq!(ca.len(), cb.len(), "file sizes differ");
	assert!(ca == cb, "file contents differ");
}
