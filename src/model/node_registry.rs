//! Registry of the storage nodes known to the coordinator, with their
//! liveness state.
//!
//! A node is active iff its last heartbeat is within
//! `heartbeat_interval × heartbeat_timeout_factor` of now. The reaper that
//! enforces this runs lazily inside every operation that samples the
//! active set; running it on a timer as well is an optimization only.

use rusqlite::{params, Connection};

use hangar_util::time::now_msec;

use crate::error::MetaError;
use crate::store::MetadataStore;

/// A registered storage node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
	pub id: i64,
	pub node_id: String,
	pub data_addr: String,
	pub admin_addr: String,
}

impl MetadataStore {
	/// Register a storage node, or refresh its addresses and liveness if it
	/// is already known. Idempotent.
	pub fn register_node(
		&self,
		node_id: &str,
		data_addr: &str,
		admin_addr: &str,
	) -> Result<i64, MetaError> {
		self.register_node_at(node_id, data_addr, admin_addr, now_msec())
	}

	pub(crate) fn register_node_at(
		&self,
		node_id: &str,
		data_addr: &str,
		admin_addr: &str,
		now: u64,
	) -> Result<i64, MetaError> {
		if node_id.is_empty() {
			return Err(MetaError::InvalidArgument("empty node id".into()));
		}

		let conn = self.lock();
		conn.execute(
			"INSERT INTO storage_nodes (node_id, data_addr, admin_addr, last_heartbeat, is_active)
			 VALUES (?1, ?2, ?3, ?4, 1)
			 ON CONFLICT (node_id) DO UPDATE SET
				data_addr = excluded.data_addr,
				admin_addr = excluded.admin_addr,
				last_heartbeat = excluded.last_heartbeat,
				is_active = 1",
			params![node_id, data_addr, admin_addr, now as i64],
		)?;
		let id: i64 = conn.query_row(
			"SELECT id FROM storage_nodes WHERE node_id = ?1",
			params![node_id],
			|row| row.get(0),
		)?;
		info!("storage node {} registered as #{} at {}", node_id, id, data_addr);
		Ok(id)
	}

	/// Record a heartbeat from a node. Unknown nodes are refused and must
	/// register first.
	pub fn heartbeat(&self, node_id: &str) -> Result<(), MetaError> {
		self.heartbeat_at(node_id, now_msec())
	}

	pub(crate) fn heartbeat_at(&self, node_id: &str, now: u64) -> Result<(), MetaError> {
		let conn = self.lock();
		let n = conn.execute(
			"UPDATE storage_nodes SET last_heartbeat = ?1, is_active = 1 WHERE node_id = ?2",
			params![now as i64, node_id],
		)?;
		if n == 0 {
			return Err(MetaError::NotFound(format!(
				"storage node {} is not registered",
				node_id
			)));
		}
		Ok(())
	}

	/// Mark every node whose heartbeat fell out of the liveness window as
	/// inactive; returns how many changed state
	pub fn reap_offline_nodes(&self) -> Result<usize, MetaError> {
		self.reap_offline_nodes_at(now_msec())
	}

	pub(crate) fn reap_offline_nodes_at(&self, now: u64) -> Result<usize, MetaError> {
		let conn = self.lock();
		Ok(reap_tx(&conn, now, self.node_timeout_msec)?)
	}

	/// The current active set, after reaping
	pub fn active_nodes(&self) -> Result<Vec<NodeInfo>, MetaError> {
		self.active_nodes_at(now_msec())
	}

	pub(crate) fn active_nodes_at(&self, now: u64) -> Result<Vec<NodeInfo>, MetaError> {
		let mut conn = self.lock();
		let tx = conn.transaction()?;
		reap_tx(&tx, now, self.node_timeout_msec)?;
		let nodes = active_nodes_tx(&tx)?;
		tx.commit()?;
		Ok(nodes)
	}
}

pub(crate) fn reap_tx(
	conn: &Connection,
	now: u64,
	timeout_msec: u64,
) -> Result<usize, rusqlite::Error> {
	let threshold = now.saturating_sub(timeout_msec);
	let n = conn.execute(
		"UPDATE storage_nodes SET is_active = 0
		 WHERE is_active = 1 AND last_heartbeat < ?1",
		params![threshold as i64],
	)?;
	if n > 0 {
		warn!("{} storage node(s) missed too many heartbeats, marked inactive", n);
	}
	Ok(n)
}

pub(crate) fn active_nodes_tx(conn: &Connection) -> Result<Vec<NodeInfo>, rusqlite::Error> {
	let mut stmt = conn.prepare(
		"SELECT id, node_id, data_addr, admin_addr
		 FROM storage_nodes WHERE is_active = 1 ORDER BY id",
	)?;
	let nodes = stmt
		.query_map([], |row| {
			Ok(NodeInfo {
				id: row.get(0)?,
				node_id: row.get(1)?,
				data_addr: row.get(2)?,
				admin_addr: row.get(3)?,
			})
		})?
		.collect::<Result<Vec<_>, _>>()?;
	Ok(nodes)
}
