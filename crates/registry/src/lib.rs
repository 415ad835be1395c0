//! Persistent registry of library books and their virtual books.
//!
//! The registry is the sole source of truth for virtual book identity. It is
//! not the source of truth for content: a virtual book only records where its
//! work lives inside the parent archive.
//!
//! # Architecture
//! Two entity types are stored:
//! - **Books**: one per library file, with the outcome of the last omnibus
//!   scan ([`BookState`](models::BookState)).
//! - **Virtual books**: one per work detected inside an omnibus book, keyed by
//!   a UUID that stays stable while the work keeps its position.
//!
//! [`SqliteRegistry`] is the production implementation; [`MemoryRegistry`]
//! (feature `mock`) is a drop-in fake for tests.

mod db;
pub mod error;
#[cfg(feature = "mock")]
mod memory;
pub mod models;
mod registry;
mod repo;
mod rows;
pub mod timestamp;

pub use crate::db::Database;
#[cfg(feature = "mock")]
pub use crate::memory::MemoryRegistry;
pub use crate::registry::{Registry, RegistryHandle};
pub use crate::repo::SqliteRegistry;
