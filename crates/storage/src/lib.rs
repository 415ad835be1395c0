//! Storage backends.
//!
//! Two keyspaces in the system go through [`StorageBackend`]: the library
//! itself (source archives, only ever read) and the artifact cache (standalone
//! archives materialized for virtual books).

pub mod backend;
pub mod error;
pub mod file;
mod path;

pub use crate::backend::StorageBackend;
pub use crate::file::FileInfo;
pub use crate::path::validate as validate_path;
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
