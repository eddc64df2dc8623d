//! Metadata model of the Hangar coordinator: the directory tree, the block
//! layout of every file, block placements and the storage node registry,
//! all persisted in one SQLite database.
#[macro_use]
extern crate tracing;

pub mod error;
pub mod store;

mod blocks;
mod fs_tree;
mod node_registry;

#[cfg(test)]
pub(crate) mod test_util;

pub use blocks::*;
pub use fs_tree::*;
pub use node_registry::*;
pub use store::MetadataStore;
