//! Omnibus detection and single-work extraction.
//!
//! Three stages, leaf first:
//! - [`Detector`] decides whether a parsed container bundles several works.
//! - [`TocParser`] flattens the navigation tree into an ordered list of
//!   [`Work`](models::Work) descriptors.
//! - [`ExtractionService`] builds a standalone container for one work from
//!   the transitive closure of the resources it references.
//!
//! Everything here is synchronous and CPU-bound; async callers run it on a
//! blocking pool.

mod closure;
mod consts;
mod detect;
pub mod error;
mod extract;
pub mod models;
mod toc;

pub use crate::closure::{DEFAULT_MAX_REFERENCE_DEPTH, ResourceClosure};
pub use crate::detect::{DEFAULT_MIN_WORKS, Detector};
pub use crate::extract::{Extraction, ExtractionService};
pub use crate::toc::{DEFAULT_TOC_DEPTH, TocParser};
