//! Stateless client SDK for Hangar.
//!
//! Control traffic (namespace operations, transfer plans) goes to the
//! coordinator over HTTP+JSON; block bytes go straight to the storage
//! nodes on the data channel. Reads fall through the replicas of a block
//! in the order the coordinator listed them.
#[macro_use]
extern crate tracing;

pub mod error;
pub use error::Error;

use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use hyper::client::HttpConnector;
use hyper::{Body, Client, Method, Request};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

use hangar_api::types::*;
use hangar_block::rpc_client::DataRpcClient;
use hangar_util::path::DfsPath;

const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

/// A handle on one Hangar cluster
pub struct DfsClient {
	coordinator: String,
	http: Client<HttpConnector, Body>,
	data: DataRpcClient,
}

impl DfsClient {
	/// `coordinator_url` is the base URL of the coordinator's control API,
	/// e.g. `http://10.0.0.1:5000`
	pub fn new(coordinator_url: &str) -> Self {
		Self {
			coordinator: coordinator_url.trim_end_matches('/').to_string(),
			http: Client::new(),
			data: DataRpcClient::new(),
		}
	}

	// ---- Namespace operations ----

	pub async fn mkdir(&self, path: &str) -> Result<MkdirResponse, Error> {
		self.control_post(
			"/mkdir",
			&PathRequest {
				path: path.to_string(),
			},
		)
		.await
	}

	pub async fn ls(&self, path: &str) -> Result<LsResponse, Error> {
		self.control_get("/ls", path).await
	}

	pub async fn rm(&self, path: &str) -> Result<MessageResponse, Error> {
		self.control_post(
			"/rm",
			&PathRequest {
				path: path.to_string(),
			},
		)
		.await
	}

	pub async fn rmdir(&self, path: &str) -> Result<MessageResponse, Error> {
		self.control_post(
			"/rmdir",
			&PathRequest {
				path: path.to_string(),
			},
		)
		.await
	}

	// ---- File transfer ----

	/// Upload a local file under a new DFS path. The target name must not
	/// exist yet; a failed block write aborts the whole upload and leaves
	/// the file invisible.
	pub async fn put(&self, local_path: &Path, dfs_path: &str) -> Result<(), Error> {
		// fail early on bad paths instead of after the initiate round-trip
		DfsPath::parse(dfs_path).map_err(|e| Error::Message(e.to_string()))?;

		let meta = fs::metadata(local_path).await?;
		if !meta.is_file() {
			return Err(Error::Message(format!(
				"{} is not a regular file",
				local_path.display()
			)));
		}
		let total_size = meta.len();

		let init: PutInitiateResponse = self
			.control_post(
				"/put/initiate",
				&PutInitiateRequest {
					path: dfs_path.to_string(),
					size: total_size,
				},
			)
			.await?;
		let plan = init.data;

		let mut f = fs::File::open(local_path).await?;
		let mut remaining = total_size;
		for assignment in plan.block_assignments.iter() {
			let this_block = remaining.min(plan.block_size) as usize;
			let mut buf = vec![0u8; this_block];
			f.read_exact(&mut buf).await?;
			remaining -= this_block as u64;

			let resp = self
				.data
				.write_block(
					&assignment.primary_datanode_grpc,
					&assignment.block_id,
					plan.file_id,
					assignment.secondary_datanode_grpc.as_deref(),
					Bytes::from(buf),
				)
				.await
				.map_err(Error::Util)?;
			if !resp.success {
				return Err(Error::Message(format!(
					"write of block {} failed: {}",
					assignment.block_id, resp.message
				)));
			}
			debug!("block {} written: {}", assignment.block_id, resp.message);
		}

		let _: MessageResponse = self
			.control_post(
				"/put/complete",
				&PutCompleteRequest {
					path: dfs_path.to_string(),
					file_id: plan.file_id,
				},
			)
			.await?;
		info!("{} uploaded to {}", local_path.display(), dfs_path);
		Ok(())
	}

	/// Download a DFS file into a local file. On failure the partially
	/// written local file is removed.
	pub async fn get(&self, dfs_path: &str, local_path: &Path) -> Result<(), Error> {
		let info: GetResponse = self.control_get("/get", dfs_path).await?;
		let mut blocks = info.data.blocks;
		blocks.sort_by_key(|b| b.sequence);

		let mut out = fs::File::create(local_path).await?;
		match self.download_blocks(&blocks, &mut out).await {
			Ok(()) => {
				out.flush().await?;
				info!("{} downloaded to {}", dfs_path, local_path.display());
				Ok(())
			}
			Err(e) => {
				drop(out);
				if let Err(unlink_err) = fs::remove_file(local_path).await {
					warn!(
						"could not remove partial download {}: {}",
						local_path.display(),
						unlink_err
					);
				}
				Err(e)
			}
		}
	}

	/// The transfer plan of a file, without downloading it
	pub async fn file_info(&self, dfs_path: &str) -> Result<FileInfoData, Error> {
		let info: GetResponse = self.control_get("/get", dfs_path).await?;
		Ok(info.data)
	}

	async fn download_blocks(
		&self,
		blocks: &[BlockReadData],
		out: &mut fs::File,
	) -> Result<(), Error> {
		for block in blocks {
			let bytes = self.fetch_block(block).await?;
			out.write_all(&bytes).await?;
		}
		Ok(())
	}

	/// Try each listed replica in turn
	async fn fetch_block(&self, block: &BlockReadData) -> Result<Bytes, Error> {
		for addr in block.datanode_grpc_addresses.iter() {
			match self.data.read_block(addr, &block.block_id).await {
				Ok(bytes) => return Ok(bytes),
				Err(e) => warn!(
					"could not read block {} from {}: {}",
					block.block_id, addr, e
				),
			}
		}
		Err(Error::BlockUnavailable(block.block_id.clone()))
	}

	// ---- Control-channel plumbing ----

	async fn control_post<B: Serialize, T: DeserializeOwned>(
		&self,
		endpoint: &str,
		body: &B,
	) -> Result<T, Error> {
		let req = Request::builder()
			.method(Method::POST)
			.uri(format!("{}{}", self.coordinator, endpoint))
			.header("Content-Type", "application/json")
			.body(Body::from(serde_json::to_string(body)?))?;
		self.control_call(endpoint, req).await
	}

	async fn control_get<T: DeserializeOwned>(
		&self,
		endpoint: &str,
		path: &str,
	) -> Result<T, Error> {
		let query = form_urlencoded::Serializer::new(String::new())
			.append_pair("path", path)
			.finish();
		let req = Request::builder()
			.method(Method::GET)
			.uri(format!("{}{}?{}", self.coordinator, endpoint, query))
			.body(Body::empty())?;
		self.control_call(endpoint, req).await
	}

	async fn control_call<T: DeserializeOwned>(
		&self,
		endpoint: &str,
		req: Request<Body>,
	) -> Result<T, Error> {
		let fut = async {
			let resp = self.http.request(req).await?;
			let status = resp.status();
			let body = hyper::body::to_bytes(resp.into_body()).await?;
			if !status.is_success() {
				let message = serde_json::from_slice::<ErrorResponse>(&body)
					.map(|e| e.error)
					.unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
				return Err(Error::Coordinator(status, message));
			}
			Ok(serde_json::from_slice(&body)?)
		};
		timeout(CONTROL_TIMEOUT, fut)
			.await
			.map_err(|_| Error::Timeout(format!("{} on {}", endpoint, self.coordinator)))?
	}
}
