//! Client side of the data channel, used by the SDK (writes and reads),
//! by primaries (follower push) and by the coordinator (block deletion).

use std::time::Duration;

use bytes::Bytes;
use hyper::client::HttpConnector;
use hyper::{Body, Client, Method, Request, Response, Uri};
use tokio::time::timeout;

use hangar_util::error::Error;

use crate::rpc_server::{BlockOpResponse, FILE_ID_HEADER, REPLICATE_TO_HEADER};

/// Upper bound on the size of one streamed WriteBlock chunk
pub const WRITE_CHUNK_SIZE: usize = 1024 * 1024;

const WRITE_BLOCK_TIMEOUT: Duration = Duration::from_secs(30);
const READ_BLOCK_TIMEOUT: Duration = Duration::from_secs(20);
const REPLICATE_BLOCK_TIMEOUT: Duration = Duration::from_secs(10);
const DELETE_BLOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// A handle on the data channel towards any storage node
#[derive(Clone)]
pub struct DataRpcClient {
	http: Client<HttpConnector, Body>,
}

impl Default for DataRpcClient {
	fn default() -> Self {
		Self::new()
	}
}

impl DataRpcClient {
	pub fn new() -> Self {
		Self {
			http: Client::new(),
		}
	}

	/// Stream a whole block to its primary, telling it where to push the
	/// follower copy
	pub async fn write_block(
		&self,
		addr: &str,
		block_id: &str,
		file_id: i64,
		replicate_to: Option<&str>,
		data: Bytes,
	) -> Result<BlockOpResponse, Error> {
		let mut chunks = vec![];
		let mut offset = 0;
		while offset < data.len() {
			let end = (offset + WRITE_CHUNK_SIZE).min(data.len());
			chunks.push(Ok::<_, std::io::Error>(data.slice(offset..end)));
			offset = end;
		}

		let mut req = Request::builder()
			.method(Method::PUT)
			.uri(block_uri(addr, block_id, "")?)
			.header(FILE_ID_HEADER, file_id.to_string());
		if let Some(target) = replicate_to {
			req = req.header(REPLICATE_TO_HEADER, target);
		}
		let req = req.body(Body::wrap_stream(futures::stream::iter(chunks)))?;

		let fut = async {
			let resp = self.http.request(req).await?;
			parse_op_response(resp).await
		};
		timeout(WRITE_BLOCK_TIMEOUT, fut)
			.await
			.map_err(|_| Error::Timeout(format!("WriteBlock {} to {}", block_id, addr)))?
	}

	/// Fetch a whole block from one replica
	pub async fn read_block(&self, addr: &str, block_id: &str) -> Result<Bytes, Error> {
		let req = Request::builder()
			.method(Method::GET)
			.uri(block_uri(addr, block_id, "")?)
			.body(Body::empty())?;

		let fut = async {
			let resp = self.http.request(req).await?;
			let status = resp.status();
			let body = hyper::body::to_bytes(resp.into_body()).await?;
			if !status.is_success() {
				return Err(Error::unexpected_status(
					status,
					&String::from_utf8_lossy(&body),
				));
			}
			Ok(body)
		};
		timeout(READ_BLOCK_TIMEOUT, fut)
			.await
			.map_err(|_| Error::Timeout(format!("ReadBlock {} from {}", block_id, addr)))?
	}

	/// Push a whole block to a follower (primary to follower only)
	pub async fn replicate_block(
		&self,
		addr: &str,
		block_id: &str,
		data: Bytes,
	) -> Result<BlockOpResponse, Error> {
		let req = Request::builder()
			.method(Method::POST)
			.uri(block_uri(addr, block_id, "/replicate")?)
			.body(Body::from(data))?;

		let fut = async {
			let resp = self.http.request(req).await?;
			parse_op_response(resp).await
		};
		timeout(REPLICATE_BLOCK_TIMEOUT, fut)
			.await
			.map_err(|_| Error::Timeout(format!("ReplicateBlock {} to {}", block_id, addr)))?
	}

	/// Ask a node to drop its copy of a block
	pub async fn delete_block(&self, addr: &str, block_id: &str) -> Result<BlockOpResponse, Error> {
		let req = Request::builder()
			.method(Method::DELETE)
			.uri(block_uri(addr, block_id, "")?)
			.body(Body::empty())?;

		let fut = async {
			let resp = self.http.request(req).await?;
			parse_op_response(resp).await
		};
		timeout(DELETE_BLOCK_TIMEOUT, fut)
			.await
			.map_err(|_| Error::Timeout(format!("DeleteBlock {} on {}", block_id, addr)))?
	}
}

fn block_uri(addr: &str, block_id: &str, suffix: &str) -> Result<Uri, Error> {
	format!("http://{}/block/{}{}", addr, block_id, suffix)
		.parse::<Uri>()
		.map_err(|e| Error::Message(format!("invalid storage node address `{}`: {}", addr, e)))
}

async fn parse_op_response(resp: Response<Body>) -> Result<BlockOpResponse, Error> {
	let status = resp.status();
	let body = hyper::body::to_bytes(resp.into_body()).await?;
	if !status.is_success() {
		// failure responses carry the same JSON shape when they come from
		// the block handlers themselves
		let message = serde_json::from_slice::<BlockOpResponse>(&body)
			.map(|r| r.message)
			.unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
		return Err(Error::unexpected_status(status, &message));
	}
	Ok(serde_json::from_slice(&body)?)
}
