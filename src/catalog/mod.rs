//! Image catalog module
//!
//! Maps slide identifiers to file paths and mask overlays, and exposes the
//! REST API used to register them.

pub mod registry;
pub mod routes;

pub use registry::{Catalog, CatalogError, ImageRecord, OverlayRecord};
pub use routes::{CatalogAppState, catalog_routes};
