//! End-to-end scenarios against an in-process cluster

use crate::common::*;

const MIB: usize = 1024 * 1024;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_small_file_round_trip() {
	let cluster = TestCluster::new(3).await;
	let tmp = mktemp::Temp::new_dir().unwrap();

	cluster.client.mkdir("/data").await.unwrap();
	let local = make_local_file(&tmp.to_path_buf(), "x.bin", 1500).await;
	cluster.client.put(&local, "/data/x").await.unwrap();

	let ls = cluster.client.ls("/data").await.unwrap();
	assert_eq!(ls.contents.len(), 1);
	assert_eq!(ls.contents[0].name, "x");
	assert!(!ls.contents[0].is_directory);
	assert_eq!(ls.contents[0].size, 1500);

	// one block, replicated on two of the three nodes
	let info = cluster.client.file_info("/data/x").await.unwrap();
	assert_eq!(info.blocks.len(), 1);
	assert_eq!(info.blocks[0].datanode_grpc_addresses.len(), 2);
	assert_eq!(cluster.stored_block_count(), 2);

	let fetched = tmp.to_path_buf().join("x.out");
	cluster.client.get("/data/x", &fetched).await.unwrap();
	assert_same_content(&local, &fetched).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_block_file() {
	let cluster = TestCluster::new(3).await;
	let tmp = mktemp::Temp::new_dir().unwrap();

	cluster.client.mkdir("/data").await.unwrap();
	let local = make_local_file(&tmp.to_path_buf(), "y.bin", 1_500_000).await;
	cluster.client.put(&local, "/data/y").await.unwrap();

	let info = cluster.client.file_info("/data/y").await.unwrap();
	assert_eq!(info.total_size, 1_500_000);
	assert_eq!(
		info.blocks.iter().map(|b| b.size).collect::<Vec<_>>(),
		vec![1_048_576, 451_424]
	);
	for block in info.blocks.iter() {
		// one primary and one follower each
		assert_eq!(block.datanode_grpc_addresses.len(), 2);
	}
	assert_eq!(cluster.stored_block_count(), 4);

	let fetched = tmp.to_path_buf().join("y.out");
	cluster.client.get("/data/y", &fetched).await.unwrap();
	assert_same_content(&local, &fetched).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_replica_failover_on_read() {
	let mut cluster = TestCluster::new(3).await;
	let tmp = mktemp::Temp::new_dir().unwrap();

	let local = make_local_file(&tmp.to_path_buf(), "z.bin", 2 * MIB).await;
	cluster.client.put(&local, "/z").await.unwrap();

	// kill the primary of the first block and let its liveness lapse
	let info = cluster.client.file_info("/z").await.unwrap();
	let primary = info.blocks[0].datanode_grpc_addresses[0].clone();
	cluster.kill_node(&primary);
	tokio::time::sleep(cluster.liveness_window() + std::time::Duration::from_millis(500)).await;
	cluster.wait_for_active_nodes(2).await;

	// the read falls through to the surviving replica of every block
	let fetched = tmp.to_path_buf().join("z.out");
	cluster.client.get("/z", &fetched).await.unwrap();
	assert_same_content(&local, &fetched).await;

	// the dead node is no longer offered to readers
	let info = cluster.client.file_info("/z").await.unwrap();
	for block in info.blocks.iter() {
		assert!(!block.datanode_grpc_addresses.contains(&primary));
	}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_insufficient_replicas() {
	let cluster = TestCluster::new(1).await;
	let tmp = mktemp::Temp::new_dir().unwrap();

	let local = make_local_file(&tmp.to_path_buf(), "f.bin", 100).await;
	let err = cluster.client.put(&local, "/f").await.unwrap_err();
	let message = err.to_string();
	assert!(
		message.contains("replication factor"),
		"unexpected error: {}",
		message
	);

	// nothing was created, neither metadata nor blocks
	let ls = cluster.client.ls("/").await.unwrap();
	assert!(ls.contents.is_empty());
	assert_eq!(cluster.stored_block_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_overwrite() {
	let cluster = TestCluster::new(3).await;
	let tmp = mktemp::Temp::new_dir().unwrap();

	cluster.client.mkdir("/data").await.unwrap();
	let local = make_local_file(&tmp.to_path_buf(), "x.bin", 1500).await;
	cluster.client.put(&local, "/data/x").await.unwrap();

	// an existing name is never overwritten
	let err = cluster.client.put(&local, "/data/x").await.unwrap_err();
	assert!(err.to_string().contains("already exists"));

	// removing it frees the name
	cluster.client.rm("/data/x").await.unwrap();
	cluster.client.put(&local, "/data/x").await.unwrap();

	let fetched = tmp.to_path_buf().join("x.out");
	cluster.client.get("/data/x", &fetched).await.unwrap();
	assert_same_content(&local, &fetched).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rmdir_requires_empty() {
	let cluster = TestCluster::new(3).await;
	let tmp = mktemp::Temp::new_dir().unwrap();

	cluster.client.mkdir("/data").await.unwrap();
	let local = make_local_file(&tmp.to_path_buf(), "x.bin", 1000).await;
	cluster.client.put(&local, "/data/x").await.unwrap();

	let err = cluster.client.rmdir("/data").await.unwrap_err();
	assert!(err.to_string().contains("not empty"));

	cluster.client.rm("/data/x").await.unwrap();
	cluster.client.rmdir("/data").await.unwrap();

	let err = cluster.client.ls("/data").await.unwrap_err();
	assert!(err.is_not_found());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rm_cleans_blocks_on_nodes() {
	let cluster = TestCluster::new(3).await;
	let tmp = mktemp::Temp::new_dir().unwrap();

	let local = make_local_file(&tmp.to_path_buf(), "big.bin", 3 * MIB + 17).await;
	cluster.client.put(&local, "/big").await.unwrap();
	// 4 blocks × 2 replicas
	assert_eq!(cluster.stored_block_count(), 8);

	cluster.client.rm("/big").await.unwrap();
	assert_eq!(cluster.stored_block_count(), 0);

	let err = cluster.client.get("/big", &tmp.to_path_buf().join("nope")).await.unwrap_err();
	assert!(err.is_not_found());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_empty_file_round_trip() {
	let cluster = TestCluster::new(2).await;
	let tmp = mktemp::Temp::new_dir().unwrap();

	let local = make_local_file(&tmp.to_path_buf(), "empty.bin", 0).await;
	cluster.client.put(&local, "/empty").await.unwrap();

	let info = cluster.client.file_info("/empty").await.unwrap();
	assert_eq!(info.total_size, 0);
	assert!(info.blocks.is_empty());
	assert_eq!(cluster.stored_block_count(), 0);

	let fetched = tmp.to_path_buf().join("empty.out");
	cluster.client.get("/empty", &fetched).await.unwrap();
	assert_same_content(&local, &fetched).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_block_boundary_sizes() {
	let cluster = TestCluster::new(2).await;
	let tmp = mktemp::Temp::new_dir().unwrap();

	// exactly one block
	let exact = make_local_file(&tmp.to_path_buf(), "exact.bin", MIB).await;
	cluster.client.put(&exact, "/exact").await.unwrap();
	let info = cluster.client.file_info("/exact").await.unwrap();
	assert_eq!(info.blocks.len(), 1);
	assert_eq!(info.blocks[0].size, MIB as u64);

	// one byte over: a second one-byte block
	let over = make_local_file(&tmp.to_path_buf(), "over.bin", MIB + 1).await;
	cluster.client.put(&over, "/over").await.unwrap();
	let info = cluster.client.file_info("/over").await.unwrap();
	assert_eq!(info.blocks.len(), 2);
	assert_eq!(info.blocks[1].size, 1);

	for (dfs, local) in [("/exact", &exact), ("/over", &over)] {
		let fetched = tmp.to_path_buf().join(format!("{}.out", dfs.trim_start_matches('/')));
		cluster.client.get(dfs, &fetched).await.unwrap();
		assert_same_content(local, &fetched).await;
	}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_put_into_missing_parent() {
	let cluster = TestCluster::new(2).await;
	let tmp = mktemp::Temp::new_dir().unwrap();

	let local = make_local_file(&tmp.to_path_buf(), "f.bin", 10).await;
	let err = cluster.client.put(&local, "/missing/f").await.unwrap_err();
	assert!(err.to_string().contains("not found"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_node_rejoin_after_silence() {
	let cluster = TestCluster::new(2).await;

	// both nodes alive, then one observes the other vanish and return:
	// heartbeats keep flowing from the running nodes, so the active set
	// stays at 2 even after several liveness windows
	tokio::time::sleep(cluster.liveness_window() * 2).await;
	assert_eq!(cluster.metadata.active_nodes().unwrap().len(), 2);
}
