//! Block layout and placement: carving a file into blocks at put time,
//! choosing replicas, and planning reads.

use rand::prelude::*;

use hangar_util::time::now_msec;

use crate::error::MetaError;
use crate::fs_tree::{map_name_collision, parse_path, resolve, resolve_parent_dir};
use crate::node_registry::{active_nodes_tx, reap_tx};
use crate::store::MetadataStore;

/// Where a client must send one block of a new file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockAssignment {
	pub block_id: String,
	pub primary_addr: String,
	/// Follower the primary pushes a copy to; None at replication factor 1
	pub secondary_addr: Option<String>,
}

/// Everything a client needs to upload a new file
#[derive(Debug, Clone)]
pub struct PutPlan {
	pub file_id: i64,
	pub block_size: u64,
	pub assignments: Vec<BlockAssignment>,
}

/// One block of a read plan: where the bytes can be fetched from, in
/// preference order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockReadInfo {
	pub block_id: String,
	pub sequence: u32,
	pub size: u64,
	pub addresses: Vec<String>,
}

/// Everything a client needs to download a file
#[derive(Debug, Clone)]
pub struct FileInfo {
	pub name: String,
	pub total_size: u64,
	pub block_size: u64,
	pub blocks: Vec<BlockReadInfo>,
}

impl MetadataStore {
	/// Create the metadata of a new file and assign its blocks to storage
	/// nodes.
	///
	/// Runs as one transaction: on any refusal (name collision, missing
	/// parent, too few active nodes) no row survives. The unique
	/// `(parent_id, name)` index decides the winner between concurrent
	/// puts of the same path.
	pub fn put_initiate(&self, path: &str, size: u64) -> Result<PutPlan, MetaError> {
		self.put_initiate_at(path, size, now_msec())
	}

	pub(crate) fn put_initiate_at(
		&self,
		path: &str,
		size: u64,
		now: u64,
	) -> Result<PutPlan, MetaError> {
		let path = parse_path(path)?;
		let (parent, name) = path.split_last().ok_or_else(|| {
			MetaError::InvalidArgument("cannot put a file at the root path".into())
		})?;

		let mut conn = self.lock();
		let tx = conn.transaction()?;

		let parent_obj = resolve_parent_dir(&tx, parent)?;
		let res = tx.execute(
			"INSERT INTO fs_objects (parent_id, name, is_directory, size, modification_time)
			 VALUES (?1, ?2, 0, ?3, ?4)",
			rusqlite::params![parent_obj.id, name, size as i64, now as i64],
		);
		map_name_collision(res, &path)?;
		let file_id = tx.last_insert_rowid();

		reap_tx(&tx, now, self.node_timeout_msec)?;
		let active = active_nodes_tx(&tx)?;
		if active.len() < self.replication_factor {
			// dropping the transaction rolls the file row back
			return Err(MetaError::InsufficientReplicas {
				active: active.len(),
				needed: self.replication_factor,
			});
		}

		let n_blocks = size_to_block_count(size, self.block_size);
		let mut rng = rand::thread_rng();
		let mut assignments = Vec::with_capacity(n_blocks as usize);
		for seq in 0..n_blocks {
			let block_id = format!("{}_{}", file_id, seq);
			let actual_size = (self.block_size).min(size - seq * self.block_size);

			// replicas are drawn independently for every block
			let chosen = active
				.choose_multiple(&mut rng, self.replication_factor)
				.collect::<Vec<_>>();

			tx.execute(
				"INSERT INTO blocks (block_id, file_id, block_sequence, size)
				 VALUES (?1, ?2, ?3, ?4)",
				rusqlite::params![block_id, file_id, seq as i64, actual_size as i64],
			)?;
			for (i, node) in chosen.iter().enumerate() {
				tx.execute(
					"INSERT INTO block_locations (block_id, node_id, is_primary)
					 VALUES (?1, ?2, ?3)",
					rusqlite::params![block_id, node.id, (i == 0) as i64],
				)?;
			}

			assignments.push(BlockAssignment {
				block_id,
				primary_addr: chosen[0].data_addr.clone(),
				secondary_addr: chosen.get(1).map(|n| n.data_addr.clone()),
			});
		}

		tx.commit()?;
		info!(
			"put initiated for {} ({} bytes, {} block(s), file id {})",
			path, size, n_blocks, file_id
		);
		Ok(PutPlan {
			file_id,
			block_size: self.block_size,
			assignments,
		})
	}

	/// Plan a read: every block of the file in sequence order, with the
	/// addresses of its active replicas (primary first). Fails Unavailable
	/// unless every block has at least one active replica.
	pub fn file_info(&self, path: &str) -> Result<FileInfo, MetaError> {
		self.file_info_at(path, now_msec())
	}

	pub(crate) fn file_info_at(&self, path: &str, now: u64) -> Result<FileInfo, MetaError> {
		let path = parse_path(path)?;

		let mut conn = self.lock();
		let tx = conn.transaction()?;

		let obj = resolve(&tx, &path)?
			.ok_or_else(|| MetaError::NotFound(path.to_string()))?;
		if obj.is_directory {
			return Err(MetaError::IsADirectory(path.to_string()));
		}

		reap_tx(&tx, now, self.node_timeout_msec)?;

		let mut stmt = tx.prepare(
			"SELECT b.block_id, b.block_sequence, b.size, n.data_addr
			 FROM blocks b
			 JOIN block_locations bl ON b.block_id = bl.block_id
			 JOIN storage_nodes n ON bl.node_id = n.id
			 WHERE b.file_id = ?1 AND n.is_active = 1
			 ORDER BY b.block_sequence, bl.is_primary DESC, n.id",
		)?;
		let rows = stmt
			.query_map(rusqlite::params![obj.id], |row| {
				Ok((
					row.get::<_, String>(0)?,
					row.get::<_, i64>(1)? as u32,
					row.get::<_, i64>(2)? as u64,
					row.get::<_, String>(3)?,
				))
			})?
			.collect::<Result<Vec<_>, _>>()?;
		drop(stmt);
		tx.commit()?;

		let mut blocks: Vec<BlockReadInfo> = vec![];
		for (block_id, sequence, size, addr) in rows {
			match blocks.last_mut() {
				Some(b) if b.block_id == block_id => b.addresses.push(addr),
				_ => blocks.push(BlockReadInfo {
					block_id,
					sequence,
					size,
					addresses: vec![addr],
				}),
			}
		}

		let expected = size_to_block_count(obj.size, self.block_size);
		if (blocks.len() as u64) < expected {
			return Err(MetaError::Unavailable(format!(
				"{}: only {} of {} block(s) have an active replica",
				path,
				blocks.len(),
				expected
			)));
		}

		Ok(FileInfo {
			name: obj.name,
			total_size: obj.size,
			block_size: self.block_size,
			blocks,
		})
	}
}

fn size_to_block_count(size: u64, block_size: u64) -> u64 {
	(size + block_size - 1) / block_size
}
