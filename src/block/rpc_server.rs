//! Data-channel RPC surface of a storage node.
//!
//! Four operations carried over HTTP with raw binary bodies, on a separate
//! listener from the coordinator's control API:
//! - `PUT /block/{id}`: WriteBlock, streamed in by a client; the node then
//!   pushes the whole block to the follower named in the request, if any
//! - `GET /block/{id}`: ReadBlock, streamed out
//! - `POST /block/{id}/replicate`: ReplicateBlock, whole-body push from
//!   the block's primary
//! - `DELETE /block/{id}`: DeleteBlock, issued by the coordinator

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use futures::Future;
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};

use hangar_util::error::Error;

use crate::rpc_client::DataRpcClient;
use crate::store::{check_block_id, BlockStore};

/// Headers of the WriteBlock request carrying what is not the byte stream
pub const FILE_ID_HEADER: &str = "x-hangar-file-id";
pub const REPLICATE_TO_HEADER: &str = "x-hangar-replicate-to";

/// Chunk size used when streaming a block out
pub const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Outcome of a WriteBlock, ReplicateBlock or DeleteBlock call
#[derive(Debug, Serialize, Deserialize)]
pub struct BlockOpResponse {
	pub block_id: String,
	pub success: bool,
	pub message: String,
}

/// The four data-channel operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataEndpoint {
	WriteBlock { block_id: String },
	ReadBlock { block_id: String },
	ReplicateBlock { block_id: String },
	DeleteBlock { block_id: String },
}

impl DataEndpoint {
	pub fn parse(method: &Method, path: &str) -> Option<Self> {
		let rest = path.strip_prefix("/block/")?;
		match (method, rest.strip_suffix("/replicate")) {
			(&Method::POST, Some(block_id)) => Some(DataEndpoint::ReplicateBlock {
				block_id: block_id.to_string(),
			}),
			(&Method::PUT, None) => Some(DataEndpoint::WriteBlock {
				block_id: rest.to_string(),
			}),
			(&Method::GET, None) => Some(DataEndpoint::ReadBlock {
				block_id: rest.to_string(),
			}),
			(&Method::DELETE, None) => Some(DataEndpoint::DeleteBlock {
				block_id: rest.to_string(),
			}),
			_ => None,
		}
	}

	fn block_id(&self) -> &str {
		match self {
			DataEndpoint::WriteBlock { block_id }
			| DataEndpoint::ReadBlock { block_id }
			| DataEndpoint::ReplicateBlock { block_id }
			| DataEndpoint::DeleteBlock { block_id } => block_id,
		}
	}
}

/// The data-channel server of one storage node
pub struct DataRpcServer {
	node_id: String,
	store: Arc<BlockStore>,
	rpc: DataRpcClient,
}

impl DataRpcServer {
	pub fn new(node_id: String, store: Arc<BlockStore>) -> Arc<Self> {
		Arc::new(Self {
			node_id,
			store,
			rpc: DataRpcClient::new(),
		})
	}

	/// Bind the server; returns the bound address (useful with port 0) and
	/// the future driving it
	pub fn bind(
		self: Arc<Self>,
		addr: SocketAddr,
		shutdown: impl Future<Output = ()> + Send + 'static,
	) -> Result<(SocketAddr, impl Future<Output = Result<(), hyper::Error>>), Error> {
		let this = self.clone();
		let make_svc = make_service_fn(move |_conn: &AddrStream| {
			let this = this.clone();
			async move {
				Ok::<_, Infallible>(service_fn(move |req| {
					let this = this.clone();
					async move { Ok::<_, Infallible>(this.handle(req).await) }
				}))
			}
		});
		let server = Server::try_bind(&addr)?.serve(make_svc);
		let bound = server.local_addr();
		info!("data channel of {} listening on {}", self.node_id, bound);
		Ok((bound, server.with_graceful_shutdown(shutdown)))
	}

	async fn handle(self: &Arc<Self>, req: Request<Body>) -> Response<Body> {
		let endpoint = match DataEndpoint::parse(req.method(), req.uri().path()) {
			Some(e) => e,
			None => {
				return plain_response(StatusCode::NOT_FOUND, "no such data endpoint");
			}
		};
		let block_id = endpoint.block_id().to_string();
		if let Err(e) = check_block_id(&block_id) {
			return op_response(StatusCode::BAD_REQUEST, &block_id, false, &e.to_string());
		}
		debug!("[{}] {:?}", self.node_id, endpoint);

		let res = match endpoint {
			DataEndpoint::WriteBlock { .. } => self.handle_write(&block_id, req).await,
			DataEndpoint::ReadBlock { .. } => self.handle_read(&block_id).await,
			DataEndpoint::ReplicateBlock { .. } => self.handle_replicate(&block_id, req).await,
			DataEndpoint::DeleteBlock { .. } => self.handle_delete(&block_id).await,
		};
		match res {
			Ok(resp) => resp,
			Err(e) => {
				warn!("[{}] error on block {}: {}", self.node_id, block_id, e);
				op_response(
					StatusCode::INTERNAL_SERVER_ERROR,
					&block_id,
					false,
					&e.to_string(),
				)
			}
		}
	}

	/// WriteBlock: append the streamed chunks in arrival order while
	/// keeping the whole payload around for the follower push
	async fn handle_write(
		&self,
		block_id: &str,
		req: Request<Body>,
	) -> Result<Response<Body>, Error> {
		let file_id = match req.headers().get(FILE_ID_HEADER) {
			Some(v) => v.to_str()?.to_string(),
			None => {
				return Ok(op_response(
					StatusCode::BAD_REQUEST,
					block_id,
					false,
					&format!("missing {} header", FILE_ID_HEADER),
				))
			}
		};
		let replicate_to = match req.headers().get(REPLICATE_TO_HEADER) {
			Some(v) => Some(v.to_str()?.to_string()),
			None => None,
		};

		let mut body = req.into_body();
		let mut parts: Vec<Bytes> = vec![];
		{
			let _lock = self.store.lock_mutate(block_id).await;
			let mut is_first = true;
			while let Some(chunk) = body.next().await {
				let chunk = chunk?;
				self.store.write_chunk(block_id, &chunk, is_first).await?;
				is_first = false;
				parts.push(chunk);
			}
			if is_first {
				// empty stream: still materialize the (empty) block
				self.store.write_chunk(block_id, &[], true).await?;
			}
		}
		let written: usize = parts.iter().map(|p| p.len()).sum();
		info!(
			"[{}] block {} of file {} written ({} bytes)",
			self.node_id, block_id, file_id, written
		);

		// Push the copy to the follower. The write has already succeeded
		// locally, so the outcome is only reported in the message.
		let message = match replicate_to {
			None => "block written; no follower to replicate to".to_string(),
			Some(target) => {
				let data = Bytes::from(parts.iter().map(|x| &x[..]).collect::<Vec<_>>().concat());
				match self.rpc.replicate_block(&target, block_id, data).await {
					Ok(resp) if resp.success => {
						format!("block written; replicated to {}", target)
					}
					Ok(resp) => {
						warn!(
							"[{}] follower {} refused block {}: {}",
							self.node_id, target, block_id, resp.message
						);
						format!("block written; replication to {} failed: {}", target, resp.message)
					}
					Err(e) => {
						warn!(
							"[{}] replication of block {} to {} failed: {}",
							self.node_id, block_id, target, e
						);
						format!("block written; replication to {} failed: {}", target, e)
					}
				}
			}
		};

		Ok(op_response(StatusCode::OK, block_id, true, &message))
	}

	async fn handle_read(&self, block_id: &str) -> Result<Response<Body>, Error> {
		match self.store.read_stream(block_id, READ_CHUNK_SIZE).await {
			Ok(stream) => Ok(Response::builder()
				.status(StatusCode::OK)
				.header("Content-Type", "application/octet-stream")
				.body(Body::wrap_stream(stream))?),
			Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(plain_response(
				StatusCode::NOT_FOUND,
				&format!("block {} not found", block_id),
			)),
			Err(e) => Err(e),
		}
	}

	async fn handle_replicate(
		&self,
		block_id: &str,
		req: Request<Body>,
	) -> Result<Response<Body>, Error> {
		let data = hyper::body::to_bytes(req.into_body()).await?;
		{
			let _lock = self.store.lock_mutate(block_id).await;
			self.store.store(block_id, &data).await?;
		}
		info!(
			"[{}] block {} replicated in ({} bytes)",
			self.node_id,
			block_id,
			data.len()
		);
		Ok(op_response(StatusCode::OK, block_id, true, "block stored"))
	}

	async fn handle_delete(&self, block_id: &str) -> Result<Response<Body>, Error> {
		let existed = {
			let _lock = self.store.lock_mutate(block_id).await;
			self.store.delete(block_id).await?
		};
		let message = if existed {
			info!("[{}] block {} deleted", self.node_id, block_id);
			"block deleted"
		} else {
			"block was already absent"
		};
		Ok(op_response(StatusCode::OK, block_id, true, message))
	}
}

fn op_response(status: StatusCode, block_id: &str, success: bool, message: &str) -> Response<Body> {
	let body = BlockOpResponse {
		block_id: block_id.to_string(),
		success,
		message: message.to_string(),
	};
	let json = serde_json::to_string(&body).unwrap_or_else(|_| "{}".to_string());
	Response::builder()
		.status(status)
		.header("Content-Type", "application/json")
		.body(Body::from(json))
		.unwrap()
}

fn plain_response(status: StatusCode, message: &str) -> Response<Body> {
	Response::builder()
		.status(status)
		.body(Body::from(message.to_string()))
		.unwrap()
}
