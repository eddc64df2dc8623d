//! The endpoint table of the control-plane API

use hyper::Method;

/// List of all control-plane endpoints
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
	Mkdir,
	Ls { path: String },
	Rm,
	Rmdir,
	PutInitiate,
	PutComplete,
	Get { path: Option<String> },
	NodeRegister,
	NodeHeartbeat,
}

impl Endpoint {
	/// Determine the endpoint from the request method, path and query
	/// string; `None` means no such route
	pub fn parse(method: &Method, path: &str, query: Option<&str>) -> Option<Self> {
		match (method, path) {
			(&Method::POST, "/mkdir") => Some(Endpoint::Mkdir),
			(&Method::GET, "/ls") => Some(Endpoint::Ls {
				path: query_path(query).unwrap_or_else(|| "/".to_string()),
			}),
			(&Method::POST, "/rm") => Some(Endpoint::Rm),
			(&Method::POST, "/rmdir") => Some(Endpoint::Rmdir),
			(&Method::POST, "/put/initiate") => Some(Endpoint::PutInitiate),
			(&Method::POST, "/put/complete") => Some(Endpoint::PutComplete),
			(&Method::GET, "/get") => Some(Endpoint::Get {
				path: query_path(query),
			}),
			(&Method::POST, "/datanode/register") => Some(Endpoint::NodeRegister),
			(&Method::POST, "/datanode/heartbeat") => Some(Endpoint::NodeHeartbeat),
			_ => None,
		}
	}

	pub fn name(&self) -> &'static str {
		match self {
			Endpoint::Mkdir => "mkdir",
			Endpoint::Ls { .. } => "ls",
			Endpoint::Rm => "rm",
			Endpoint::Rmdir => "rmdir",
			Endpoint::PutInitiate => "put_initiate",
			Endpoint::PutComplete => "put_complete",
			Endpoint::Get { .. } => "get",
			Endpoint::NodeRegister => "node_register",
			Endpoint::NodeHeartbeat => "node_heartbeat",
		}
	}
}

fn query_path(query: Option<&str>) -> Option<String> {
	form_urlencoded::parse(query?.as_bytes())
		.find(|(k, _)| k == "path")
		.map(|(_, v)| v.into_owned())
}
