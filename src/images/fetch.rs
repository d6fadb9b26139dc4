/// Image fetching seam
///
/// The pipeline asks an `ImageFetcher` to load a URL and learns only
/// whether it worked and what size it came out. `FetchPathImages` fetches
/// through any `Fetch` implementation, typically the offline cache.
use async_trait::async_trait;
use bytes::Bytes;
use image::ImageReader;
use std::io::Cursor;
use std::sync::Arc;
use tokio::task;
use url::Url;

use super::source::{decode_data_uri, is_data_uri, is_svg};
use crate::error::ImageLoadError;
use crate::offline::http::{resolve, Request};
use crate::offline::network::Fetch;

const IMAGE_ACCEPT: &str = "image/avif,image/webp,image/*,*/*;q=0.8";

/// A successfully loaded image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedImage {
    pub url: String,
    pub width: u32,
    pub height: u32,
}

#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Load `url` completely; any failure is one failed attempt
    async fn fetch_image(&self, url: &str) -> Result<LoadedImage, ImageLoadError>;
}

/// Loads images over a `Fetch` path and decodes them for their size
pub struct FetchPathImages {
    base: Url,
    fetch: Arc<dyn Fetch>,
}

impl FetchPathImages {
    /// Relative image URLs resolve against `base`
    pub fn new(base: Url, fetch: Arc<dyn Fetch>) -> Self {
        Self { base, fetch }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }
}

impl std::fmt::Debug for FetchPathImages {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchPathImages")
            .field("base", &self.base.as_str())
            .finish()
    }
}

#[async_trait]
impl ImageFetcher for FetchPathImages {
    async fn fetch_image(&self, url: &str) -> Result<LoadedImage, ImageLoadError> {
        if is_data_uri(url) {
            let data = decode_data_uri(url)?;
            let (width, height) = if data.media_type == "image/svg+xml" {
                (0, 0)
            } else {
                dimensions(Bytes::from(data.bytes)).await?
            };
            return Ok(LoadedImage {
                url: url.to_string(),
                width,
                height,
            });
        }

        let target = resolve(&self.base, url).map_err(|e| ImageLoadError::Network(e.to_string()))?;
        let request = Request::get(target).with_header("accept", IMAGE_ACCEPT);
        let response = self
            .fetch
            .fetch(&request)
            .await
            .map_err(|e| ImageLoadError::Network(e.to_string()))?;
        if !response.ok() {
            return Err(ImageLoadError::Status(response.status));
        }

        let svg = is_svg(request.path())
            || response
                .content_type()
                .is_some_and(|ct| ct.starts_with("image/svg+xml"));
        let (width, height) = if svg {
            (0, 0)
        } else {
            dimensions(response.body).await?
        };

        Ok(LoadedImage {
            url: url.to_string(),
            width,
            height,
        })
    }
}

/// Read the image header on a blocking worker
async fn dimensions(bytes: Bytes) -> Result<(u32, u32), ImageLoadError> {
    task::spawn_blocking(move || {
        ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| ImageLoadError::Decode(e.to_string()))?
            .into_dimensions()
            .map_err(|e| ImageLoadError::Decode(e.to_string()))
    })
    .await
    .map_err(|e| ImageLoadError::Decode(format!("decode task failed: {}", e)))?
}
