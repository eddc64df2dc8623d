//! On-disk storage of block payloads: a flat directory with one file per
//! block, named after the block id.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use rand::prelude::*;

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::io::ReaderStream;

use hangar_util::error::Error;

const MUTATION_LOCK_SHARDS: usize = 16;

/// Local block storage of one storage node
pub struct BlockStore {
	data_dir: PathBuf,

	// Mutations on the same block id serialize on one of these; reads
	// don't take them (a delete racing a read just truncates the stream
	// and the client retries on another replica).
	mutation_lock: [Mutex<()>; MUTATION_LOCK_SHARDS],
}

impl BlockStore {
	pub async fn new(data_dir: PathBuf) -> Result<Arc<Self>, Error> {
		fs::create_dir_all(&data_dir).await?;
		Ok(Arc::new(Self {
			data_dir,
			mutation_lock: [(); MUTATION_LOCK_SHARDS].map(|_| Mutex::new(())),
		}))
	}

	pub async fn lock_mutate(&self, block_id: &str) -> MutexGuard<'_, ()> {
		let mut h = DefaultHasher::new();
		block_id.hash(&mut h);
		self.mutation_lock[h.finish() as usize % MUTATION_LOCK_SHARDS]
			.lock()
			.await
	}

	fn block_path(&self, block_id: &str) -> PathBuf {
		let mut path = self.data_dir.clone();
		path.push(block_id);
		path
	}

	/// Append one chunk of a block being streamed in; the first chunk
	/// truncates whatever was there
	pub async fn write_chunk(
		&self,
		block_id: &str,
		data: &[u8],
		is_first: bool,
	) -> Result<(), Error> {
		let path = self.block_path(block_id);
		let mut f = if is_first {
			fs::OpenOptions::new()
				.write(true)
				.create(true)
				.truncate(true)
				.open(&path)
				.await?
		} else {
			fs::OpenOptions::new().append(true).open(&path).await?
		};
		f.write_all(data).await?;
		Ok(())
	}

	/// Stream the stored bytes of a block, in file order
	pub async fn read_stream(
		&self,
		block_id: &str,
		chunk_size: usize,
	) -> Result<ReaderStream<fs::File>, Error> {
		let f = fs::File::open(self.block_path(block_id)).await?;
		Ok(ReaderStream::with_capacity(f, chunk_size))
	}

	/// Read a whole block
	pub async fn read(&self, block_id: &str) -> Result<Bytes, Error> {
		let data = fs::read(self.block_path(block_id)).await?;
		Ok(Bytes::from(data))
	}

	/// Store a whole block atomically: write to a temporary file, fsync,
	/// rename into place
	pub async fn store(&self, block_id: &str, data: &[u8]) -> Result<(), Error> {
		let path = self.block_path(block_id);
		let mut path_tmp = path.clone().into_os_string();
		path_tmp.push(format!(".tmp{}", hex::encode(thread_rng().gen::<[u8; 4]>())));
		let path_tmp = PathBuf::from(path_tmp);

		let mut delete_on_drop = DeleteOnDrop(Some(path_tmp.clone()));

		let mut f = fs::File::create(&path_tmp).await?;
		f.write_all(data).await?;
		f.sync_all().await?;
		drop(f);

		fs::rename(path_tmp, path).await?;
		delete_on_drop.cancel();
		Ok(())
	}

	/// Delete a block; returns whether it existed. Absence is not an
	/// error, so a repeated delete is harmless.
	pub async fn delete(&self, block_id: &str) -> Result<bool, Error> {
		match fs::remove_file(self.block_path(block_id)).await {
			Ok(()) => Ok(true),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
			Err(e) => Err(e.into()),
		}
	}

	/// Number of blocks currently stored (leftover temporaries excluded)
	pub async fn block_count(&self) -> Result<usize, Error> {
		let mut count = 0;
		let mut entries = fs::read_dir(&self.data_dir).await?;
		while let Some(entry) = entries.next_entry().await? {
			if let Some(name) = entry.file_name().to_str() {
				if check_block_id(name).is_ok() {
					count += 1;
				}
			}
		}
		Ok(count)
	}
}

/// Block ids become file names; refuse anything that could escape the
/// block directory or collide with temporary files
pub fn check_block_id(block_id: &str) -> Result<(), Error> {
	let valid = !block_id.is_empty()
		&& !block_id.starts_with('.')
		&& !block_id.contains(".tmp")
		&& block_id
			.chars()
			.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
	if valid {
		Ok(())
	} else {
		Err(Error::Message(format!("invalid block id `{}`", block_id)))
	}
}

struct DeleteOnDrop(Option<PathBuf>);

impl DeleteOnDrop {
	fn cancel(&mut self) {
		drop(self.0.take());
	}
}

impl Drop for DeleteOnDrop {
	fn drop(&mut self) {
		if let Some(path) = self.0.take() {
			tokio::spawn(async move {
				if let Err(e) = fs::remove_file(&path).await {
					debug!("DeleteOnDrop failed for {}: {}", path.display(), e);
				}
			});
		}
	}
}
