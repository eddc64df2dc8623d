use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;

use hangar_util::config::Config;
use hangar_util::time::now_msec;

use crate::error::MetaError;

/// Id of the root directory, created at initialization
pub const ROOT_ID: i64 = 1;

// AUTOINCREMENT on fs_objects: file ids must never be reused, block ids
// derive from them and stale physical blocks may survive on offline nodes.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS fs_objects (
	id INTEGER PRIMARY KEY AUTOINCREMENT,
	parent_id INTEGER REFERENCES fs_objects(id) ON DELETE CASCADE,
	name TEXT NOT NULL,
	is_directory INTEGER NOT NULL DEFAULT 0,
	size INTEGER NOT NULL DEFAULT 0,
	modification_time INTEGER NOT NULL,
	UNIQUE (parent_id, name)
);

CREATE TABLE IF NOT EXISTS blocks (
	block_id TEXT PRIMARY KEY,
	file_id INTEGER NOT NULL REFERENCES fs_objects(id) ON DELETE CASCADE,
	block_sequence INTEGER NOT NULL,
	size INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS blocks_by_file ON blocks (file_id, block_sequence);

CREATE TABLE IF NOT EXISTS block_locations (
	block_id TEXT NOT NULL REFERENCES blocks(block_id) ON DELETE CASCADE,
	node_id INTEGER NOT NULL REFERENCES storage_nodes(id),
	is_primary INTEGER NOT NULL DEFAULT 0,
	PRIMARY KEY (block_id, node_id)
);

CREATE TABLE IF NOT EXISTS storage_nodes (
	id INTEGER PRIMARY KEY AUTOINCREMENT,
	node_id TEXT NOT NULL UNIQUE,
	data_addr TEXT NOT NULL,
	admin_addr TEXT NOT NULL,
	last_heartbeat INTEGER NOT NULL,
	is_active INTEGER NOT NULL DEFAULT 1
);
";

/// The coordinator's authoritative metadata store.
///
/// One SQLite connection behind a mutex; every public operation runs as a
/// single transaction on that connection.
pub struct MetadataStore {
	db: Mutex<Connection>,

	pub(crate) block_size: u64,
	pub(crate) replication_factor: usize,
	pub(crate) node_timeout_msec: u64,
}

impl MetadataStore {
	pub fn open(path: &Path, config: &Config) -> Result<Arc<Self>, MetaError> {
		let conn = Connection::open(path)?;
		Self::init(conn, config)
	}

	/// An in-memory store, for tests and embedding
	pub fn open_in_memory(config: &Config) -> Result<Arc<Self>, MetaError> {
		let conn = Connection::open_in_memory()?;
		Self::init(conn, config)
	}

	fn init(conn: Connection, config: &Config) -> Result<Arc<Self>, MetaError> {
		conn.execute_batch("PRAGMA foreign_keys = ON;")?;
		conn.execute_batch(SCHEMA)?;
		conn.execute(
			"INSERT OR IGNORE INTO fs_objects (id, parent_id, name, is_directory, size, modification_time)
			 VALUES (?1, NULL, '/', 1, 0, ?2)",
			rusqlite::params![ROOT_ID, now_msec() as i64],
		)?;
		debug!(
			"metadata store open (sqlite {}), block_size={}, replication_factor={}",
			rusqlite::version(),
			config.block_size,
			config.replication_factor
		);

		Ok(Arc::new(Self {
			db: Mutex::new(conn),
			block_size: config.block_size,
			replication_factor: config.replication_factor,
			node_timeout_msec: config.node_timeout_msec(),
		}))
	}

	pub fn block_size(&self) -> u64 {
		self.block_size
	}

	pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
		self.db.lock().unwrap()
	}
}
