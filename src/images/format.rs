/// Modern image format (WebP) support detection
///
/// The check decodes a tiny embedded sample once per process. The result is
/// written exactly once into a `OnceLock` and read by every load task
/// afterwards; until it resolves, images are requested in their original
/// format.
use image::ImageFormat;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::task;
use tracing::{debug, info, warn};

use super::source::decode_data_uri;

/// 1x1 lossless WebP
pub const WEBP_SAMPLE: &str = "data:image/webp;base64,UklGRhoAAABXRUJQVlA4TA0AAAAvAAAAEAcQERGIiP4HAA==";

/// Observable detection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatState {
    Unknown,
    Supported,
    Unsupported,
}

/// Write-once format support flag
#[derive(Debug, Default)]
pub struct FormatSupport {
    flag: OnceLock<bool>,
}

impl FormatSupport {
    pub const fn new() -> Self {
        Self {
            flag: OnceLock::new(),
        }
    }

    /// A flag that is already resolved (hosts that know the answer, tests)
    pub fn resolved(supported: bool) -> Self {
        let support = Self::new();
        let _ = support.flag.set(supported);
        support
    }

    pub fn state(&self) -> FormatState {
        match self.flag.get() {
            None => FormatState::Unknown,
            Some(true) => FormatState::Supported,
            Some(false) => FormatState::Unsupported,
        }
    }

    /// Unknown counts as unsupported
    pub fn is_supported(&self) -> bool {
        self.flag.get().copied().unwrap_or(false)
    }

    /// Decode the embedded sample, bounded by `timeout`
    pub async fn detect(&self, timeout: Duration) -> bool {
        self.detect_with(timeout, decode_sample).await
    }

    /// Run `decode` on a blocking worker; success means non-zero
    /// dimensions. Failure and timeout both resolve to unsupported.
    /// A flag that is already resolved is returned without probing again.
    pub async fn detect_with<F>(&self, timeout: Duration, decode: F) -> bool
    where
        F: FnOnce() -> Result<(u32, u32), String> + Send + 'static,
    {
        if let Some(&supported) = self.flag.get() {
            return supported;
        }

        let supported = match tokio::time::timeout(timeout, task::spawn_blocking(decode)).await {
            Ok(Ok(Ok((width, height)))) => width > 0 && height > 0,
            Ok(Ok(Err(reason))) => {
                debug!("WebP sample did not decode: {}", reason);
                false
            }
            Ok(Err(join_err)) => {
                warn!("⚠️  Format check task failed: {}", join_err);
                false
            }
            Err(_) => {
                warn!("⚠️  Format check timed out after {:?}", timeout);
                false
            }
        };

        // A concurrent check may have won; its answer stands.
        let _ = self.flag.set(supported);
        let supported = self.is_supported();
        info!("🖼️  WebP support: {}", supported);
        supported
    }
}

/// Decode the embedded WebP sample and return its dimensions
pub fn decode_sample() -> Result<(u32, u32), String> {
    let data = decode_data_uri(WEBP_SAMPLE).map_err(|e| e.to_string())?;
    let img = image::load_from_memory_with_format(&data.bytes, ImageFormat::WebP)
        .map_err(|e| format!("Failed to decode WebP sample: {}", e))?;
    Ok((img.width(), img.height()))
}
