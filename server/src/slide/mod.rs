//! Whole-slide image reading and deep-zoom tile production

pub mod dzi;
pub mod gate;
pub mod handle_cache;
pub mod producer;
pub mod routes;
pub mod types;

pub use dzi::{dzi_levels, dzi_xml, tile_geometry};
pub use gate::DecodeGate;
pub use handle_cache::SlideHandleCache;
pub use producer::TileProducer;
pub use routes::{SlideAppState, dzi_routes, slide_api_routes};
pub use types::{SlideError, SlideMetadata, TileRequest};
