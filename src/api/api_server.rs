//! The coordinator's control-plane HTTP server

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::Future;
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};

use hangar_block::rpc_client::DataRpcClient;
use hangar_model::{BlockCleanup, MetadataStore};
use hangar_util::error::Error as UtilError;
use hangar_util::time::msec_to_rfc3339;

use crate::error::Error;
use crate::helpers::*;
use crate::router::Endpoint;
use crate::types::*;

/// The coordinator's request plane
pub struct CoordinatorApiServer {
	metadata: Arc<MetadataStore>,
	rpc: DataRpcClient,
}

impl CoordinatorApiServer {
	pub fn new(metadata: Arc<MetadataStore>) -> Arc<Self> {
		Arc::new(Self {
			metadata,
			rpc: DataRpcClient::new(),
		})
	}

	/// Bind the server; returns the bound address (useful with port 0) and
	/// the future driving it
	pub fn bind(
		self: Arc<Self>,
		addr: SocketAddr,
		shutdown: impl Future<Output = ()> + Send + 'static,
	) -> Result<(SocketAddr, impl Future<Output = Result<(), hyper::Error>>), UtilError> {
		let make_svc = make_service_fn(move |_conn: &AddrStream| {
			let this = self.clone();
			async move {
				Ok::<_, Infallible>(service_fn(move |req| {
					let this = this.clone();
					async move { Ok::<_, Infallible>(this.handle(req).await) }
				}))
			}
		});
		let server = Server::try_bind(&addr)?.serve(make_svc);
		let bound = server.local_addr();
		info!("control API listening on {}", bound);
		Ok((bound, server.with_graceful_shutdown(shutdown)))
	}

	pub async fn run(
		self: Arc<Self>,
		addr: SocketAddr,
		shutdown: impl Future<Output = ()> + Send + 'static,
	) -> Result<(), UtilError> {
		let (_addr, server) = self.bind(addr, shutdown)?;
		server.await?;
		Ok(())
	}

	async fn handle(self: &Arc<Self>, req: Request<Body>) -> Response<Body> {
		let method = req.method().clone();
		let path = req.uri().path().to_string();
		let query = req.uri().query().map(str::to_string);

		let endpoint = match Endpoint::parse(&method, &path, query.as_deref()) {
			Some(e) => e,
			None => {
				return error_response(
					StatusCode::NOT_FOUND,
					format!("no such endpoint: {} {}", method, path),
				)
			}
		};
		debug!("{} {} -> {}", method, path, endpoint.name());

		match self.dispatch(&endpoint, req).await {
			Ok(resp) => resp,
			Err(e) => {
				let status = refused_status(&endpoint, &e);
				if status.is_server_error() {
					error!("{} failed: {}", endpoint.name(), e);
				} else {
					info!("{} refused: {}", endpoint.name(), e);
				}
				error_response(status, e.to_string())
			}
		}
	}

	async fn dispatch(
		&self,
		endpoint: &Endpoint,
		req: Request<Body>,
	) -> Result<Response<Body>, Error> {
		match endpoint {
			Endpoint::Mkdir => self.handle_mkdir(req).await,
			Endpoint::Ls { path } => self.handle_ls(path).await,
			Endpoint::Rm => self.handle_rm(req).await,
			Endpoint::Rmdir => self.handle_rmdir(req).await,
			Endpoint::PutInitiate => self.handle_put_initiate(req).await,
			Endpoint::PutComplete => self.handle_put_complete(req).await,
			Endpoint::Get { path } => self.handle_get(path.as_deref()).await,
			Endpoint::NodeRegister => self.handle_register(req).await,
			Endpoint::NodeHeartbeat => self.handle_heartbeat(req).await,
		}
	}

	// ---- Namespace operations ----

	async fn handle_mkdir(&self, req: Request<Body>) -> Result<Response<Body>, Error> {
		let body: PathRequest = parse_json_body(req).await?;
		let obj = self.metadata.mkdir(&body.path)?;
		json_response(
			StatusCode::CREATED,
			&MkdirResponse {
				message: "directory created".to_string(),
				path: body.path,
				id: obj.id,
			},
		)
	}

	async fn handle_ls(&self, path: &str) -> Result<Response<Body>, Error> {
		let entries = self.metadata.list_dir(path)?;
		json_response(
			StatusCode::OK,
			&LsResponse {
				path: path.to_string(),
				contents: entries
					.into_iter()
					.map(|e| LsEntry {
						name: e.name,
						is_directory: e.is_directory,
						size: e.size,
						modified: msec_to_rfc3339(e.modification_time),
					})
					.collect(),
			},
		)
	}

	async fn handle_rm(&self, req: Request<Body>) -> Result<Response<Body>, Error> {
		let body: PathRequest = parse_json_body(req).await?;
		let removed = self.metadata.remove(&body.path, false)?;
		// metadata removal is authoritative; cleaning the storage nodes is
		// best-effort and never fails the request
		self.delete_blocks(&removed.blocks).await;
		json_response(
			StatusCode::OK,
			&MessageResponse {
				message: format!("{} removed", body.path),
			},
		)
	}

	async fn handle_rmdir(&self, req: Request<Body>) -> Result<Response<Body>, Error> {
		let body: PathRequest = parse_json_body(req).await?;
		self.metadata.remove(&body.path, true)?;
		json_response(
			StatusCode::OK,
			&MessageResponse {
				message: format!("{} removed", body.path),
			},
		)
	}

	// ---- File transfer operations ----

	async fn handle_put_initiate(&self, req: Request<Body>) -> Result<Response<Body>, Error> {
		let body: PutInitiateRequest = parse_json_body(req).await?;
		let plan = self.metadata.put_initiate(&body.path, body.size)?;
		json_response(
			StatusCode::OK,
			&PutInitiateResponse {
				data: PutPlanData {
					file_id: plan.file_id,
					block_size: plan.block_size,
					block_assignments: plan
						.assignments
						.into_iter()
						.map(|a| BlockAssignmentInfo {
							block_id: a.block_id,
							primary_datanode_grpc: a.primary_addr,
							secondary_datanode_grpc: a.secondary_addr,
						})
						.collect(),
				},
			},
		)
	}

	async fn handle_put_complete(&self, req: Request<Body>) -> Result<Response<Body>, Error> {
		let body: PutCompleteRequest = parse_json_body(req).await?;
		match self.metadata.stat(&body.path)? {
			Some(obj) if !obj.is_directory && obj.id == body.file_id => json_response(
				StatusCode::OK,
				&MessageResponse {
					message: format!("upload of {} acknowledged", body.path),
				},
			),
			Some(_) => Err(Error::BadRequest(format!(
				"{} does not match file id {}",
				body.path, body.file_id
			))),
			None => Err(Error::BadRequest(format!(
				"no file at {} for file id {}",
				body.path, body.file_id
			))),
		}
	}

	async fn handle_get(&self, path: Option<&str>) -> Result<Response<Body>, Error> {
		let path = path.ok_or_else(|| Error::BadRequest("missing `path` query parameter".into()))?;
		let info = self.metadata.file_info(path)?;
		json_response(
			StatusCode::OK,
			&GetResponse {
				data: FileInfoData {
					file_name: info.name,
					total_size: info.total_size,
					block_size: info.block_size,
					blocks: info
						.blocks
						.into_iter()
						.map(|b| BlockReadData {
							block_id: b.block_id,
							sequence: b.sequence,
							size: b.size,
							datanode_grpc_addresses: b.addresses,
						})
						.collect(),
				},
			},
		)
	}

	// ---- Storage node management ----

	async fn handle_register(&self, req: Request<Body>) -> Result<Response<Body>, Error> {
		let body: RegisterRequest = parse_json_body(req).await?;
		if body.datanode_id.is_empty() || body.grpc_address.is_empty() || body.flask_address.is_empty()
		{
			return Err(Error::BadRequest(
				"datanode_id, grpc_address and flask_address are all required".into(),
			));
		}
		let id =
			self.metadata
				.register_node(&body.datanode_id, &body.grpc_address, &body.flask_address)?;
		json_response(
			StatusCode::CREATED,
			&RegisterResponse {
				message: format!("storage node {} registered", body.datanode_id),
				id,
			},
		)
	}

	async fn handle_heartbeat(&self, req: Request<Body>) -> Result<Response<Body>, Error> {
		let body: HeartbeatRequest = parse_json_body(req).await?;
		self.metadata.heartbeat(&body.datanode_id)?;
		json_response(
			StatusCode::OK,
			&HeartbeatResponse {
				tasks: TaskSet::default(),
			},
		)
	}

	// ---- Block cleanup after rm ----

	/// Tell every node that held a copy of the removed blocks, active or
	/// not, to drop it. Failures are logged and swallowed.
	async fn delete_blocks(&self, blocks: &[BlockCleanup]) {
		for block in blocks {
			for addr in block.addresses.iter() {
				match self.rpc.delete_block(addr, &block.block_id).await {
					Ok(resp) if resp.success => {
						debug!("block {} deleted on {}", block.block_id, addr)
					}
					Ok(resp) => warn!(
						"node {} failed to delete block {}: {}",
						addr, block.block_id, resp.message
					),
					Err(e) => warn!(
						"could not reach {} to delete block {}: {}",
						addr, block.block_id, e
					),
				}
			}
		}
	}
}

/// Failure status per endpoint, following the API contract: pure lookups
/// answer 404, mutations 400, rmdir distinguishes the two
fn refused_status(endpoint: &Endpoint, e: &Error) -> StatusCode {
	match endpoint {
		Endpoint::Ls { .. } | Endpoint::Get { .. } => e.http_status_code_or(StatusCode::NOT_FOUND),
		Endpoint::Rmdir => e.http_status_code(),
		_ => e.http_status_code_or(StatusCode::BAD_REQUEST),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use hyper::Method;

	use hangar_util::config::Config;

	fn test_server() -> Arc<CoordinatorApiServer> {
		let config = Config {
			block_size: 1024,
			replication_factor: 2,
			heartbeat_interval_sec: 10,
			heartbeat_timeout_factor: 3,
			coordinator: None,
			storage_node: None,
		};
		let metadata = MetadataStore::open_in_memory(&config).unwrap();
		CoordinatorApiServer::new(metadata)
	}

	async fn call(
		server: &Arc<CoordinatorApiServer>,
		method: Method,
		uri: &str,
		body: Option<serde_json::Value>,
	) -> (StatusCode, serde_json::Value) {
		let body = match body {
			Some(v) => Body::from(v.to_string()),
			None => Body::empty(),
		};
		let req = Request::builder()
			.method(method)
			.uri(uri)
			.body(body)
			.unwrap();
		let resp = server.handle(req).await;
		let status = resp.status();
		let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
		let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
		(status, json)
	}

	fn register_nodes(server: &Arc<CoordinatorApiServer>, n: usize) {
		for i in 0..n {
			server
				.metadata
				.register_node(
					&format!("n{}", i),
					&format!("127.0.0.1:{}", 50051 + i),
					&format!("http://127.0.0.1:{}", 5001 + i),
				)
				.unwrap();
		}
	}

	#[tokio::test]
	async fn test_namespace_endpoints() {
		let server = test_server();

		let (status, body) = call(
			&server,
			Method::POST,
			"/mkdir",
			Some(serde_json::json!({"path": "/data"})),
		)
		.await;
		assert_eq!(status, StatusCode::CREATED);
		assert_eq!(body["path"], "/data");

		// duplicate: 400 with an error body
		let (status, body) = call(
			&server,
			Method::POST,
			"/mkdir",
			Some(serde_json::json!({"path": "/data"})),
		)
		.await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
		assert!(body["error"].as_str().unwrap().contains("already exists"));

		let (status, body) = call(&server, Method::GET, "/ls?path=%2F", None).await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(body["contents"][0]["name"], "data");
		assert_eq!(body["contents"][0]["is_directory"], true);

		let (status, _) = call(&server, Method::GET, "/ls?path=%2Fmissing", None).await;
		assert_eq!(status, StatusCode::NOT_FOUND);

		// rmdir of something absent is 404, of something non-empty 400
		let (status, _) = call(
			&server,
			Method::POST,
			"/rmdir",
			Some(serde_json::json!({"path": "/missing"})),
		)
		.await;
		assert_eq!(status, StatusCode::NOT_FOUND);

		server.metadata.mkdir("/data/inner").unwrap();
		let (status, _) = call(
			&server,
			Method::POST,
			"/rmdir",
			Some(serde_json::json!({"path": "/data"})),
		)
		.await;
		assert_eq!(status, StatusCode::BAD_REQUEST);

		let (status, _) = call(
			&server,
			Method::POST,
			"/rmdir",
			Some(serde_json::json!({"path": "/data/inner"})),
		)
		.await;
		assert_eq!(status, StatusCode::OK);
	}

	#[tokio::test]
	async fn test_put_initiate_endpoint() {
		let server = test_server();

		// no storage nodes yet: refused
		let (status, body) = call(
			&server,
			Method::POST,
			"/put/initiate",
			Some(serde_json::json!({"path": "/f", "size": 100})),
		)
		.await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
		assert!(body["error"].as_str().unwrap().contains("replication factor"));

		register_nodes(&server, 3);
		let (status, body) = call(
			&server,
			Method::POST,
			"/put/initiate",
			Some(serde_json::json!({"path": "/f", "size": 2500})),
		)
		.await;
		assert_eq!(status, StatusCode::OK);
		let data = &body["data"];
		assert_eq!(data["block_size"], 1024);
		let assignments = data["block_assignments"].as_array().unwrap();
		assert_eq!(assignments.len(), 3);
		assert!(assignments[0]["secondary_datanode_grpc"].is_string());

		// put/complete with the right id succeeds, with a wrong one fails
		let file_id = data["file_id"].as_i64().unwrap();
		let (status, _) = call(
			&server,
			Method::POST,
			"/put/complete",
			Some(serde_json::json!({"path": "/f", "file_id": file_id})),
		)
		.await;
		assert_eq!(status, StatusCode::OK);
		let (status, _) = call(
			&server,
			Method::POST,
			"/put/complete",
			Some(serde_json::json!({"path": "/f", "file_id": file_id + 1})),
		)
		.await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
	}

	#[tokio::test]
	async fn test_get_endpoint() {
		let server = test_server();
		register_nodes(&server, 2);
		server.metadata.put_initiate("/f", 1500).unwrap();

		let (status, body) = call(&server, Method::GET, "/get?path=%2Ff", None).await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(body["data"]["file_name"], "f");
		assert_eq!(body["data"]["total_size"], 1500);
		let blocks = body["data"]["blocks"].as_array().unwrap();
		assert_eq!(blocks.len(), 2);
		assert_eq!(blocks[0]["sequence"], 0);
		assert_eq!(
			blocks[0]["datanode_grpc_addresses"].as_array().unwrap().len(),
			2
		);

		let (status, _) = call(&server, Method::GET, "/get?path=%2Fnope", None).await;
		assert_eq!(status, StatusCode::NOT_FOUND);

		// missing query parameter is a malformed request
		let (status, _) = call(&server, Method::GET, "/get", None).await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
	}

	#[tokio::test]
	async fn test_node_endpoints() {
		let server = test_server();

		// heartbeat from an unknown node is refused
		let (status, _) = call(
			&server,
			Method::POST,
			"/datanode/heartbeat",
			Some(serde_json::json!({"datanode_id": "ghost"})),
		)
		.await;
		assert_eq!(status, StatusCode::BAD_REQUEST);

		let (status, body) = call(
			&server,
			Method::POST,
			"/datanode/register",
			Some(serde_json::json!({
				"datanode_id": "n1",
				"grpc_address": "127.0.0.1:50051",
				"flask_address": "http://127.0.0.1:5001",
			})),
		)
		.await;
		assert_eq!(status, StatusCode::CREATED);
		assert!(body["id"].as_i64().unwrap() > 0);

		let (status, body) = call(
			&server,
			Method::POST,
			"/datanode/heartbeat",
			Some(serde_json::json!({"datanode_id": "n1"})),
		)
		.await;
		assert_eq!(status, StatusCode::OK);
		assert!(body["tasks"]["replication_tasks"].as_array().unwrap().is_empty());
		assert!(body["tasks"]["deletion_tasks"].as_array().unwrap().is_empty());

		// registration with a missing field is refused
		let (status, _) = call(
			&server,
			Method::POST,
			"/datanode/register",
			Some(serde_json::json!({
				"datanode_id": "n2",
				"grpc_address": "",
				"flask_address": "x",
			})),
		)
		.await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
	}

	#[tokio::test]
	async fn test_unknown_route() {
		let server = test_server();
		let (status, body) = call(&server, Method::GET, "/nope", None).await;
		assert_eq!(status, StatusCode::NOT_FOUND);
		assert!(body["error"].as_str().is_some());
	}
}
