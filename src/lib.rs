//! Image delivery and offline caching for the studio website
//!
//! Two independent components:
//! - `images` - lazy loading, WebP negotiation, retries and placeholders
//! - `offline` - a partitioned request cache with install/activate
//!   lifecycle, routing strategies and background sync
//!
//! They compose only through the `Fetch` seam: image loads can be sent
//! through an `OfflineCache` like any other request.

pub mod config;
pub mod dom;
pub mod error;
pub mod images;
pub mod offline;

#[cfg(test)]
mod testing;

pub use config::{CacheConfig, Config, LoaderConfig};
pub use error::{Error, Result};
pub use images::{FetchPathImages, FormatSupport, ImagePipeline};
pub use offline::{Fetch, OfflineCache, Request, Response};
