//!
//! Conversion of one email into a single PDF, and routing of that PDF into a queue.
//!
//! A [`Converter`] renders the body, converts every supported attachment, and merges the results into one
//! pending artifact. A [`Session`] keeps that artifact in its [`PendingSlot`] until the operator sends it
//! to a queue through the [`QueueRouter`] or discards it.
//!
#![warn(missing_docs)]

pub use attachment::*;
pub use audit::*;
pub use converter::*;
pub use error::*;
pub use pending::*;
pub use render::*;
pub use retry::*;
pub use router::*;
pub use sanitize::*;
pub use session::*;
pub use workspace::*;

mod attachment;
mod audit;
mod converter;
mod error;
mod merge;
mod pending;
mod render;
mod retry;
mod router;
mod sanitize;
mod session;
mod workspace;

/// Single-page PDFs from raster images.
///
pub mod image_pdf;

pub use merge::merge_pdfs;
