//! Parsing and validation of absolute DFS paths
//!
//! Paths are received from clients as strings and never normalized on the
//! server side: a path must already be absolute, without empty segments or
//! a trailing slash (the root `/` being the only exception). `.` and `..`
//! segments are refused instead of resolved.

use crate::error::Error;

/// A validated absolute path, split into its components.
/// The root path has no components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DfsPath {
	components: Vec<String>,
}

impl DfsPath {
	/// Parse and validate a path string
	pub fn parse(path: &str) -> Result<Self, Error> {
		if !path.starts_with('/') {
			return Err(Error::Message(format!(
				"path `{}` is not absolute (must start with `/`)",
				path
			)));
		}
		if path == "/" {
			return Ok(Self { components: vec![] });
		}
		if path.ends_with('/') {
			return Err(Error::Message(format!(
				"path `{}` must not end with a trailing slash",
				path
			)));
		}

		let mut components = vec![];
		for segment in path[1..].split('/') {
			match segment {
				"" => {
					return Err(Error::Message(format!(
						"path `{}` contains an empty segment",
						path
					)))
				}
				"." | ".." => {
					return Err(Error::Message(format!(
						"path `{}` contains a `{}` segment; send a normalized path",
						path, segment
					)))
				}
				seg => components.push(seg.to_string()),
			}
		}
		Ok(Self { components })
	}

	pub fn is_root(&self) -> bool {
		self.components.is_empty()
	}

	pub fn components(&self) -> &[String] {
		&self.components[..]
	}

	/// Split into (parent components, final name); `None` for the root
	pub fn split_last(&self) -> Option<(&[String], &str)> {
		match self.components.split_last() {
			Some((name, parent)) => Some((parent, name.as_str())),
			None => None,
		}
	}
}

impl std::fmt::Display for DfsPath {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		if self.components.is_empty() {
			write!(f, "/")
		} else {
			for c in self.components.iter() {
				write!(f, "/{}", c)?;
			}
			Ok(())
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_root() {
		let p = DfsPath::parse("/").unwrap();
		assert!(p.is_root());
		assert_eq!(p.split_last(), None);
		assert_eq!(p.to_string(), "/");
	}

	#[test]
	fn test_parse_nested() {
		let p = DfsPath::parse("/data/reports/q3.csv").unwrap();
		assert_eq!(p.components(), &["data", "reports", "q3.csv"]);
		let (parent, name) = p.split_last().unwrap();
		assert_eq!(parent, &["data", "reports"]);
		assert_eq!(name, "q3.csv");
		assert_eq!(p.to_string(), "/data/reports/q3.csv");
	}

	#[test]
	fn test_parse_rejections() {
		assert!(DfsPath::parse("").is_err());
		assert!(DfsPath::parse("data/x").is_err());
		assert!(DfsPath::parse("/data/").is_err());
		assert!(DfsPath::parse("//data").is_err());
		assert!(DfsPath::parse("/data//x").is_err());
		assert!(DfsPath::parse("/data/./x").is_err());
		assert!(DfsPath::parse("/data/../x").is_err());
	}
}
