//! Portable (PNG data URL) form of a buffer for display, download and
//! network submission. Uses the same `data:image/png;base64,` shape the
//! share-generation service returns, so its output can be fed straight back.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};

use crate::error::{PipelineError, Result};
use crate::imaging::PixelBuffer;

pub const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

/// PNG bytes for `buffer`, encoded straight from its raster.
pub fn encode_png(buffer: &PixelBuffer) -> Result<Vec<u8>> {
    let mut png = Vec::new();
    PngEncoder::new(&mut png).write_image(
        buffer.data(),
        buffer.width(),
        buffer.height(),
        ExtendedColorType::Rgba8,
    )?;
    Ok(png)
}

/// PNG-encode `buffer` and wrap it as a data URL.
pub fn to_portable_encoding(buffer: &PixelBuffer) -> Result<String> {
    let b64 = STANDARD.encode(encode_png(buffer)?);
    let mut url = String::with_capacity(PNG_DATA_URL_PREFIX.len() + b64.len());
    url.push_str(PNG_DATA_URL_PREFIX);
    url.push_str(&b64);
    Ok(url)
}

/// Bytes behind a `data:<mime>;base64,<payload>` URL. A bare base64 payload
/// without the `data:` header is accepted too.
pub fn decode_data_url(url: &str) -> Result<Vec<u8>> {
    let trimmed = url.trim();
    let payload = match trimmed.strip_prefix("data:") {
        Some(rest) => {
            let (header, body) = rest
                .split_once(',')
                .ok_or_else(|| PipelineError::invalid_image("data URL has no payload"))?;
            let Some(mime) = header.strip_suffix(";base64") else {
                return Err(PipelineError::invalid_image("data URL is not base64 encoded"));
            };
            if !is_media_type(mime) {
                return Err(PipelineError::invalid_image("data URL media type is malformed"));
            }
            body
        }
        None => trimmed,
    };
    if payload.is_empty() {
        return Err(PipelineError::invalid_image("data URL payload is empty"));
    }
    STANDARD
        .decode(payload)
        .map_err(|e| PipelineError::invalid_image(format!("base64 decode error: {}", e)))
}

/// Empty, or a bare `type/subtype` of token characters. Parameters other
/// than the trailing `;base64` are not accepted.
fn is_media_type(mime: &str) -> bool {
    if mime.is_empty() {
        return true;
    }
    let token = |s: &str| {
        !s.is_empty()
            && s.bytes()
                .all(|b| b.is_ascii_alphanumeric() || b"!#$&^_.+-".contains(&b))
    };
    matches!(mime.split_once('/'), Some((ty, sub)) if token(ty) && token(sub))
}
