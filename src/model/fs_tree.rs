//! Namespace operations on the directory tree: path resolution, mkdir,
//! ls and removal.

use rusqlite::{params, Connection, OptionalExtension, Row};

use hangar_util::error::Error as UtilError;
use hangar_util::path::DfsPath;
use hangar_util::time::now_msec;

use crate::error::MetaError;
use crate::store::{MetadataStore, ROOT_ID};

/// One entry of the fs_objects table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsObject {
	pub id: i64,
	pub parent_id: Option<i64>,
	pub name: String,
	pub is_directory: bool,
	pub size: u64,
	pub modification_time: u64,
}

/// One child in a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
	pub name: String,
	pub is_directory: bool,
	pub size: u64,
	pub modification_time: u64,
}

/// A block of a removed file together with every address that held a copy,
/// active or not, so the request plane can clean them up best-effort
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockCleanup {
	pub block_id: String,
	pub addresses: Vec<String>,
}

/// Result of removing a namespace entry
#[derive(Debug, Clone)]
pub struct RemovedObject {
	pub is_directory: bool,
	pub blocks: Vec<BlockCleanup>,
}

impl MetadataStore {
	/// Create a directory. The parent must already exist.
	pub fn mkdir(&self, path: &str) -> Result<FsObject, MetaError> {
		let path = parse_path(path)?;
		let (parent, name) = path
			.split_last()
			.ok_or_else(|| MetaError::AlreadyExists("/".into()))?;

		let mut conn = self.lock();
		let tx = conn.transaction()?;

		let parent_obj = resolve_parent_dir(&tx, parent)?;
		let res = tx.execute(
			"INSERT INTO fs_objects (parent_id, name, is_directory, size, modification_time)
			 VALUES (?1, ?2, 1, 0, ?3)",
			params![parent_obj.id, name, now_msec() as i64],
		);
		map_name_collision(res, &path)?;
		let obj = get_object(&tx, tx.last_insert_rowid())?
			.ok_or_else(|| MetaError::Internal(UtilError::Message("inserted row not found".into())))?;

		tx.commit()?;
		Ok(obj)
	}

	/// List the children of a directory
	pub fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>, MetaError> {
		let path = parse_path(path)?;

		let mut conn = self.lock();
		let tx = conn.transaction()?;

		let obj = resolve(&tx, &path)?
			.ok_or_else(|| MetaError::NotFound(path.to_string()))?;
		if !obj.is_directory {
			return Err(MetaError::NotADirectory(path.to_string()));
		}

		let mut stmt = tx.prepare(
			"SELECT name, is_directory, size, modification_time
			 FROM fs_objects WHERE parent_id = ?1 ORDER BY name",
		)?;
		let entries = stmt
			.query_map(params![obj.id], |row| {
				Ok(DirEntry {
					name: row.get(0)?,
					is_directory: row.get::<_, i64>(1)? != 0,
					size: row.get::<_, i64>(2)? as u64,
					modification_time: row.get::<_, i64>(3)? as u64,
				})
			})?
			.collect::<Result<Vec<_>, _>>()?;
		drop(stmt);

		tx.commit()?;
		Ok(entries)
	}

	/// Look up a path without failing on absence
	pub fn stat(&self, path: &str) -> Result<Option<FsObject>, MetaError> {
		let path = parse_path(path)?;
		let conn = self.lock();
		Ok(resolve(&conn, &path)?)
	}

	/// Remove a file or an (empty) directory. With `must_be_directory`,
	/// refuse to remove anything else.
	///
	/// Deleting the fs_objects row cascades to blocks and block_locations;
	/// the ids and addresses of the affected blocks are collected first and
	/// returned so the caller can reach out to the storage nodes.
	pub fn remove(&self, path: &str, must_be_directory: bool) -> Result<RemovedObject, MetaError> {
		let path = parse_path(path)?;

		let mut conn = self.lock();
		let tx = conn.transaction()?;

		let obj = resolve(&tx, &path)?
			.ok_or_else(|| MetaError::NotFound(path.to_string()))?;
		if obj.parent_id.is_none() {
			return Err(MetaError::InvalidArgument(
				"the root directory cannot be removed".into(),
			));
		}
		if must_be_directory && !obj.is_directory {
			return Err(MetaError::NotADirectory(path.to_string()));
		}

		let blocks = if obj.is_directory {
			let children: i64 = tx.query_row(
				"SELECT COUNT(*) FROM fs_objects WHERE parent_id = ?1",
				params![obj.id],
				|row| row.get(0),
			)?;
			if children > 0 {
				return Err(MetaError::NotEmpty(path.to_string()));
			}
			vec![]
		} else {
			block_cleanups(&tx, obj.id)?
		};

		tx.execute("DELETE FROM fs_objects WHERE id = ?1", params![obj.id])?;
		tx.commit()?;

		info!("removed {} ({} block(s) to clean up)", path, blocks.len());
		Ok(RemovedObject {
			is_directory: obj.is_directory,
			blocks,
		})
	}
}

// ---- Path resolution and row helpers, shared with the block operations ----

pub(crate) fn parse_path(path: &str) -> Result<DfsPath, MetaError> {
	DfsPath::parse(path).map_err(|e| MetaError::InvalidArgument(e.to_string()))
}

pub(crate) fn join_components(components: &[String]) -> String {
	if components.is_empty() {
		"/".to_string()
	} else {
		let mut s = String::new();
		for c in components {
			s.push('/');
			s.push_str(c);
		}
		s
	}
}

fn fs_object_from_row(row: &Row) -> rusqlite::Result<FsObject> {
	Ok(FsObject {
		id: row.get(0)?,
		parent_id: row.get(1)?,
		name: row.get(2)?,
		is_directory: row.get::<_, i64>(3)? != 0,
		size: row.get::<_, i64>(4)? as u64,
		modification_time: row.get::<_, i64>(5)? as u64,
	})
}

pub(crate) fn get_object(conn: &Connection, id: i64) -> Result<Option<FsObject>, MetaError> {
	let obj = conn
		.query_row(
			"SELECT id, parent_id, name, is_directory, size, modification_time
			 FROM fs_objects WHERE id = ?1",
			params![id],
			fs_object_from_row,
		)
		.optional()?;
	Ok(obj)
}

/// Walk the tree from the root. Non-terminal components must be
/// directories; a mismatch resolves to "not found", like a missing entry.
pub(crate) fn resolve_components(
	conn: &Connection,
	components: &[String],
) -> Result<Option<FsObject>, MetaError> {
	let mut obj = get_object(conn, ROOT_ID)?
		.ok_or_else(|| MetaError::Internal(UtilError::Message("root directory is missing".into())))?;

	for (i, name) in components.iter().enumerate() {
		let is_last = i == components.len() - 1;
		let query = if is_last {
			"SELECT id, parent_id, name, is_directory, size, modification_time
			 FROM fs_objects WHERE parent_id = ?1 AND name = ?2"
		} else {
			"SELECT id, parent_id, name, is_directory, size, modification_time
			 FROM fs_objects WHERE parent_id = ?1 AND name = ?2 AND is_directory = 1"
		};
		match conn
			.query_row(query, params![obj.id, name], fs_object_from_row)
			.optional()?
		{
			Some(next) => obj = next,
			None => return Ok(None),
		}
	}
	Ok(Some(obj))
}

pub(crate) fn resolve(conn: &Connection, path: &DfsPath) -> Result<Option<FsObject>, MetaError> {
	resolve_components(conn, path.components())
}

/// Resolve the parent of a new entry: it must exist and be a directory
pub(crate) fn resolve_parent_dir(
	conn: &Connection,
	parent: &[String],
) -> Result<FsObject, MetaError> {
	let parent_obj = resolve_components(conn, parent)?
		.ok_or_else(|| MetaError::NotFound(join_components(parent)))?;
	if !parent_obj.is_directory {
		return Err(MetaError::NotADirectory(join_components(parent)));
	}
	Ok(parent_obj)
}

/// Turn a `(parent_id, name)` unique-constraint violation into
/// AlreadyExists; the constraint is what makes concurrent creation of the
/// same path yield exactly one winner.
pub(crate) fn map_name_collision(
	res: Result<usize, rusqlite::Error>,
	path: &DfsPath,
) -> Result<usize, MetaError> {
	match res {
		Ok(n) => Ok(n),
		Err(rusqlite::Error::SqliteFailure(e, _))
			if e.code == rusqlite::ErrorCode::ConstraintViolation =>
		{
			Err(MetaError::AlreadyExists(path.to_string()))
		}
		Err(e) => Err(e.into()),
	}
}

fn block_cleanups(conn: &Connection, file_id: i64) -> Result<Vec<BlockCleanup>, MetaError> {
	let mut stmt = conn.prepare(
		"SELECT b.block_id, n.data_addr
		 FROM blocks b
		 JOIN block_locations bl ON b.block_id = bl.block_id
		 JOIN storage_nodes n ON bl.node_id = n.id
		 WHERE b.file_id = ?1
		 ORDER BY b.block_sequence",
	)?;
	let rows = stmt
		.query_map(params![file_id], |row| {
			Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
		})?
		.collect::<Result<Vec<_>, _>>()?;

	let mut cleanups: Vec<BlockCleanup> = vec![];
	for (block_id, addr) in rows {
		match cleanups.last_mut() {
			Some(c) if c.block_id == block_id => c.addresses.push(addr),
			_ => cleanups.push(BlockCleanup {
				block_id,
				addresses: vec![addr],
			}),
		}
	}
	Ok(cleanups)
}
