use hyper::{Body, Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Error;
use crate::types::ErrorResponse;

/// Read and deserialize a JSON request body
pub async fn parse_json_body<T: DeserializeOwned>(req: Request<Body>) -> Result<T, Error> {
	let body = hyper::body::to_bytes(req.into_body()).await?;
	serde_json::from_slice::<T>(&body)
		.map_err(|e| Error::BadRequest(format!("invalid request body: {}", e)))
}

/// Serialize a value as the JSON body of a response
pub fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Result<Response<Body>, Error> {
	let json = serde_json::to_string(value)
		.map_err(|e| Error::Internal(hangar_util::error::Error::Json(e)))?;
	Ok(Response::builder()
		.status(status)
		.header("Content-Type", "application/json")
		.body(Body::from(json))?)
}

/// The error body every failing endpoint answers with
pub fn error_response(status: StatusCode, message: String) -> Response<Body> {
	let body = serde_json::to_string(&ErrorResponse { error: message })
		.unwrap_or_else(|_| "{\"error\":\"internal error\"}".to_string());
	Response::builder()
		.status(status)
		.header("Content-Type", "application/json")
		.body(Body::from(body))
		.unwrap()
}
