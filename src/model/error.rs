use err_derive::Error;

/// Errors of metadata operations, classified by meaning.
/// The request plane maps these onto HTTP statuses.
#[derive(Debug, Error)]
pub enum MetaError {
	#[error(display = "not found: {}", _0)]
	NotFound(String),

	#[error(display = "already exists: {}", _0)]
	AlreadyExists(String),

	#[error(display = "invalid argument: {}", _0)]
	InvalidArgument(String),

	#[error(display = "not a directory: {}", _0)]
	NotADirectory(String),

	#[error(display = "is a directory: {}", _0)]
	IsADirectory(String),

	#[error(display = "directory not empty: {}", _0)]
	NotEmpty(String),

	#[error(
		display = "only {} active storage node(s) for replication factor {}",
		active,
		needed
	)]
	InsufficientReplicas { active: usize, needed: usize },

	#[error(display = "unavailable: {}", _0)]
	Unavailable(String),

	#[error(display = "database error: {}", _0)]
	Db(#[error(source)] rusqlite::Error),

	#[error(display = "{}", _0)]
	Internal(#[error(source)] hangar_util::error::Error),
}

impl MetaError {
	/// Whether this error denotes a malfunction (as opposed to a request
	/// that was understood and refused)
	pub fn is_internal(&self) -> bool {
		matches!(self, MetaError::Db(_) | MetaError::Internal(_))
	}
}
