use err_derive::Error;
use hyper::StatusCode;

/// Errors returned by the SDK
#[derive(Debug, Error)]
pub enum Error {
	#[error(display = "IO error: {}", _0)]
	Io(#[error(source)] std::io::Error),

	#[error(display = "HTTP error: {}", _0)]
	Http(#[error(source)] http::Error),

	#[error(display = "Hyper error: {}", _0)]
	Hyper(#[error(source)] hyper::Error),

	#[error(display = "JSON error: {}", _0)]
	Json(#[error(source)] serde_json::Error),

	#[error(display = "{}", _0)]
	Util(#[error(source)] hangar_util::error::Error),

	#[error(display = "coordinator refused the request ({}): {}", _0, _1)]
	Coordinator(StatusCode, String),

	#[error(display = "block {} could not be read from any replica", _0)]
	BlockUnavailable(String),

	#[error(display = "timeout: {}", _0)]
	Timeout(String),

	#[error(display = "{}", _0)]
	Message(String),
}

impl Error {
	/// Whether the coordinator answered "no such entry"
	pub fn is_not_found(&self) -> bool {
		matches!(self, Error::Coordinator(StatusCode::NOT_FOUND, _))
	}
}
