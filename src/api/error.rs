use err_derive::Error;
use hyper::StatusCode;

use hangar_model::error::MetaError;
use hangar_util::error::Error as UtilError;

/// Errors of the control-plane API
#[derive(Debug, Error)]
pub enum Error {
	/// Error from the metadata layer
	#[error(display = "{}", _0)]
	Meta(#[error(source)] MetaError),

	/// The request itself is malformed
	#[error(display = "bad request: {}", _0)]
	BadRequest(String),

	/// Something went wrong on our side
	#[error(display = "internal error: {}", _0)]
	Internal(#[error(source)] UtilError),
}

impl From<hyper::Error> for Error {
	fn from(e: hyper::Error) -> Error {
		Error::Internal(UtilError::Hyper(e))
	}
}

impl From<http::Error> for Error {
	fn from(e: http::Error) -> Error {
		Error::Internal(UtilError::Http(e))
	}
}

impl Error {
	/// Semantic status mapping: absences are 404, refusals 400,
	/// malfunctions 500
	pub fn http_status_code(&self) -> StatusCode {
		match self {
			Error::Meta(m) => match m {
				MetaError::NotFound(_) | MetaError::Unavailable(_) => StatusCode::NOT_FOUND,
				MetaError::Db(_) | MetaError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
				_ => StatusCode::BAD_REQUEST,
			},
			Error::BadRequest(_) => StatusCode::BAD_REQUEST,
			Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}

	/// Status mapping for endpoints documented with a single failure code:
	/// every refusal surfaces as `refused`, malformed requests stay 400
	/// and malfunctions stay 500
	pub fn http_status_code_or(&self, refused: StatusCode) -> StatusCode {
		match self {
			Error::Meta(m) if !m.is_internal() => refused,
			Error::BadRequest(_) => StatusCode::BAD_REQUEST,
			_ => self.http_status_code(),
		}
	}
}
