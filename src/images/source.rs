/// Source URL decisions: modern-format variants, placeholders, data URIs
use base64::Engine;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::error::ImageLoadError;

/// Extension of the modern format
pub const MODERN_EXTENSION: &str = ".webp";

/// Extensions that have a modern-format sibling
const NEGOTIABLE_EXTENSIONS: [&str; 3] = [".jpg", ".jpeg", ".png"];

/// Characters left alone by `encodeURIComponent`
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

pub fn is_data_uri(src: &str) -> bool {
    src.starts_with("data:")
}

pub fn is_svg(src: &str) -> bool {
    src.to_ascii_lowercase().ends_with(".svg")
}

/// SVGs and inline data never go through format negotiation
pub fn is_negotiable(src: &str) -> bool {
    !is_svg(src) && !is_data_uri(src) && !src.contains("base64")
}

/// The modern-format sibling of `src`, by extension substitution.
/// `None` when `src` is already modern or has no negotiable extension.
pub fn modern_variant(src: &str) -> Option<String> {
    if !is_negotiable(src) {
        return None;
    }
    let lower = src.to_ascii_lowercase();
    NEGOTIABLE_EXTENSIONS
        .iter()
        .find(|ext| lower.ends_with(*ext))
        .map(|ext| format!("{}{}", &src[..src.len() - ext.len()], MODERN_EXTENSION))
}

/// `encodeURIComponent` equivalent
pub fn encode_component(text: &str) -> String {
    utf8_percent_encode(text, URI_COMPONENT).to_string()
}

/// Placeholder image URL labelled with the element's alt text
pub fn placeholder_url(service: &str, alt: Option<&str>) -> String {
    let label = alt.filter(|a| !a.is_empty()).unwrap_or("Image");
    format!("{}?text={}", service, encode_component(label))
}

/// Decoded `data:` URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUri {
    pub media_type: String,
    pub bytes: Vec<u8>,
}

/// Decode a `data:[<mediatype>][;base64],<data>` URI
pub fn decode_data_uri(uri: &str) -> Result<DataUri, ImageLoadError> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| ImageLoadError::DataUri("missing data: prefix".to_string()))?;
    let (metadata, data) = rest
        .split_once(',')
        .ok_or_else(|| ImageLoadError::DataUri("missing comma".to_string()))?;

    let mut parts = metadata.split(';');
    let media_type = match parts.next().map(str::trim) {
        Some(m) if !m.is_empty() => m.to_ascii_lowercase(),
        _ => "text/plain".to_string(),
    };
    let is_base64 = parts.any(|p| p.trim().eq_ignore_ascii_case("base64"));

    let bytes = if is_base64 {
        let compact: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        base64::engine::general_purpose::STANDARD
            .decode(compact)
            .map_err(|e| ImageLoadError::DataUri(e.to_string()))?
    } else {
        percent_decode_str(data).collect()
    };

    Ok(DataUri { media_type, bytes })
}
