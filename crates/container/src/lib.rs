//! EPUB containers.
//!
//! A [`Container`] is a fully parsed archive held in memory: every resource
//! with its bytes, the linear reading order, the navigation tree and the
//! bibliographic metadata. [`read`] turns archive bytes into a container and
//! [`write`] turns a container back into a valid EPUB 3 archive,
//! deterministically, so that identical containers always produce
//! byte-identical output.
//!
//! Resource paths inside a container are normalized, `/`-separated and
//! relative to the package document's directory. [`path::resolve`] maps a
//! reference found inside one document onto that namespace.

pub mod error;
mod model;
pub mod path;
mod read;
mod write;
mod xml;

pub use crate::model::{Container, Metadata, NavPoint, Resource, media_type};
pub use crate::read::read;
pub use crate::write::write;
