//! Module containing error types used in Hangar

use err_derive::Error;
use http::StatusCode;

/// Errors of this crate
#[derive(Debug, Error)]
pub enum Error {
	#[error(display = "IO error: {}", _0)]
	Io(#[error(source)] std::io::Error),

	#[error(display = "HTTP error: {}", _0)]
	Http(#[error(source)] http::Error),

	#[error(display = "Hyper error: {}", _0)]
	Hyper(#[error(source)] hyper::Error),

	#[error(display = "Invalid HTTP header value: {}", _0)]
	HttpHeader(#[error(source)] http::header::ToStrError),

	#[error(display = "JSON error: {}", _0)]
	Json(#[error(source)] serde_json::error::Error),

	#[error(display = "Invalid TOML: {}", _0)]
	Toml(#[error(source)] toml::de::Error),

	#[error(display = "Timeout waiting for {}", _0)]
	Timeout(String),

	#[error(display = "Remote error ({}): {}", _0, _1)]
	Remote(StatusCode, String),

	#[error(display = "{}", _0)]
	Message(String),
}

impl Error {
	pub fn unexpected_status(status: StatusCode, body: &str) -> Self {
		Error::Remote(status, body.trim().to_string())
	}
}

impl From<tokio::time::error::Elapsed> for Error {
	fn from(_e: tokio::time::error::Elapsed) -> Error {
		Error::Timeout("operation".into())
	}
}

/// Trait to map any error type to Error::Message
pub trait ErrorContext<T, E> {
	fn err_context<C: std::borrow::Borrow<str>>(self, context: C) -> Result<T, Error>;
}

impl<T, E> ErrorContext<T, E> for Result<T, E>
where
	E: std::fmt::Display,
{
	#[inline]
	fn err_context<C: std::borrow::Borrow<str>>(self, context: C) -> Result<T, Error> {
		self.map_err(|e| Error::Message(format!("{}: {}", context.borrow(), e)))
	}
}

/// Trait to map an Option to Error::Message
pub trait OkOrMessage {
	type S;
	fn ok_or_message<M: Into<String>>(self, message: M) -> Result<Self::S, Error>;
}

impl<T> OkOrMessage for Option<T> {
	type S = T;
	fn ok_or_message<M: Into<String>>(self, message: M) -> Result<T, Error> {
		self.ok_or_else(|| Error::Message(message.into()))
	}
}
