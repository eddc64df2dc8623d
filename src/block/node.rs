//! Runtime of one storage node: data-channel server, admin server, and the
//! heartbeat loop towards the coordinator.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::Future;
use hyper::client::HttpConnector;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Client, Method, Request, Response, Server, StatusCode};
use tokio::sync::watch;

use hangar_util::config::{Config, StorageNodeConfig};
use hangar_util::error::{Error, OkOrMessage};
use hangar_util::shutdown::await_shutdown;

use crate::rpc_server::DataRpcServer;
use crate::store::BlockStore;

const CONTROL_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// A running storage node
pub struct StorageNode {
	pub node_id: String,
	pub store: Arc<BlockStore>,

	cfg: StorageNodeConfig,
	heartbeat_interval: Duration,
	http: Client<HttpConnector, Body>,
}

impl StorageNode {
	pub async fn new(config: &Config) -> Result<Arc<Self>, Error> {
		let cfg = config
			.storage_node
			.clone()
			.ok_or_message("configuration has no [storage_node] section")?;
		let store = BlockStore::new(cfg.data_dir.clone()).await?;
		Ok(Arc::new(Self {
			node_id: cfg.node_id.clone(),
			store,
			cfg,
			heartbeat_interval: Duration::from_secs(config.heartbeat_interval_sec),
			http: Client::new(),
		}))
	}

	/// Run the node until the watch channel says to exit
	pub async fn run(self: Arc<Self>, must_exit: watch::Receiver<bool>) -> Result<(), Error> {
		let rpc_server = DataRpcServer::new(self.node_id.clone(), self.store.clone());
		let (data_addr, data_server) =
			rpc_server.bind(self.cfg.bind_addr, await_shutdown(must_exit.clone()))?;
		let (admin_addr, admin_server) = self
			.clone()
			.bind_admin(self.cfg.admin_bind_addr, await_shutdown(must_exit.clone()))?;

		// addresses other machines will use to reach this node
		let public_addr = self
			.cfg
			.public_addr
			.clone()
			.unwrap_or_else(|| data_addr.to_string());
		let admin_public_addr = self
			.cfg
			.admin_public_addr
			.clone()
			.unwrap_or_else(|| format!("http://{}", admin_addr));

		let heartbeats = tokio::spawn(self.clone().heartbeat_loop(
			public_addr,
			admin_public_addr,
			must_exit.clone(),
		));

		let (data_res, admin_res) = futures::join!(data_server, admin_server);
		data_res?;
		admin_res?;
		heartbeats.abort();
		info!("[{}] storage node stopped", self.node_id);
		Ok(())
	}

	// ---- Heartbeats ----

	async fn heartbeat_loop(
		self: Arc<Self>,
		data_addr: String,
		admin_addr: String,
		mut must_exit: watch::Receiver<bool>,
	) {
		// first registration is retried until the coordinator is reachable
		while !*must_exit.borrow() {
			match self.register(&data_addr, &admin_addr).await {
				Ok(()) => {
					info!("[{}] registered with coordinator", self.node_id);
					break;
				}
				Err(e) => warn!("[{}] could not register with coordinator: {}", self.node_id, e),
			}
			tokio::select! {
				_ = tokio::time::sleep(self.heartbeat_interval) => (),
				_ = must_exit.changed() => (),
			}
		}

		let mut needs_register = false;
		while !*must_exit.borrow() {
			tokio::select! {
				_ = tokio::time::sleep(self.heartbeat_interval) => (),
				_ = must_exit.changed() => continue,
			}
			if needs_register {
				match self.register(&data_addr, &admin_addr).await {
					Ok(()) => needs_register = false,
					Err(e) => {
						warn!("[{}] re-registration failed: {}", self.node_id, e);
						continue;
					}
				}
			}
			match self.send_heartbeat().await {
				Ok(()) => trace!("[{}] heartbeat acknowledged", self.node_id),
				Err(e) => {
					// the coordinator may have restarted or reaped us;
					// registering again recovers both cases
					warn!("[{}] heartbeat failed: {}", self.node_id, e);
					needs_register = true;
				}
			}
		}
	}

	async fn register(&self, data_addr: &str, admin_addr: &str) -> Result<(), Error> {
		let body = serde_json::json!({
			"datanode_id": self.node_id,
			"grpc_address": data_addr,
			"flask_address": admin_addr,
		});
		self.control_call("/datanode/register", &body).await
	}

	async fn send_heartbeat(&self) -> Result<(), Error> {
		let body = serde_json::json!({ "datanode_id": self.node_id });
		self.control_call("/datanode/heartbeat", &body).await
	}

	async fn control_call(&self, endpoint: &str, body: &serde_json::Value) -> Result<(), Error> {
		let uri = format!("{}{}", self.cfg.coordinator.trim_end_matches('/'), endpoint);
		let req = Request::builder()
			.method(Method::POST)
			.uri(uri.as_str())
			.header("Content-Type", "application/json")
			.body(Body::from(serde_json::to_string(body)?))?;

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
			Ok(())
		};
		tokio::time::timeout(CONTROL_CALL_TIMEOUT, fut)
			.await
			.map_err(|_| Error::Timeout(format!("POST {}", uri)))?
	}

	// ---- Admin channel ----

	fn bind_admin(
		self: Arc<Self>,
		addr: SocketAddr,
		shutdown: impl Future<Output = ()> + Send + 'static,
	) -> Result<(SocketAddr, impl Future<Output = Result<(), hyper::Error>>), Error> {
		let this = self.clone();
		let make_svc = make_service_fn(move |_conn| {
			let this = this.clone();
			async move {
				Ok::<_, Infallible>(service_fn(move |req| {
					let this = this.clone();
					async move { Ok::<_, Infallible>(this.handle_admin(req).await) }
				}))
			}
		});
		let server = Server::try_bind(&addr)?.serve(make_svc);
		let bound = server.local_addr();
		info!("admin channel of {} listening on {}", self.node_id, bound);
		Ok((bound, server.with_graceful_shutdown(shutdown)))
	}

	async fn handle_admin(self: &Arc<Self>, req: Request<Body>) -> Response<Body> {
		match (req.method(), req.uri().path()) {
			(&Method::GET, "/health") => {
				let blocks = self.store.block_count().await.unwrap_or(0);
				let body = serde_json::json!({
					"node_id": self.node_id,
					"blocks": blocks,
				});
				Response::builder()
					.status(StatusCode::OK)
					.header("Content-Type", "application/json")
					.body(Body::from(body.to_string()))
					.unwrap()
			}
			_ => Response::builder()
				.status(StatusCode::NOT_FOUND)
				.body(Body::from("no such admin endpoint"))
				.unwrap(),
		}
	}
}
