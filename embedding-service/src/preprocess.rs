//! Image decoding and tensor preparation for the visual encoder.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use image::{RgbImage, imageops::FilterType};

use crate::error::ImageError;

/// Per-channel normalisation used by the Qwen2-VL image processor (CLIP statistics)
pub const IMAGE_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
pub const IMAGE_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

/// Decode a base64-encoded image into RGB pixels.
///
/// Accepts bare base64 as well as `data:<mime>;base64,<payload>` URLs.
/// Whitespace inside the payload is ignored.
pub fn decode_base64_image(encoded: &str, max_bytes: usize) -> Result<RgbImage, ImageError> {
    let payload = match encoded.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => encoded,
    };
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Err(ImageError::Empty);
    }

    let bytes = STANDARD.decode(compact.as_bytes())?;
    decode_image_bytes(&bytes, max_bytes)
}

/// Decode raw image bytes into RGB pixels
pub fn decode_image_bytes(bytes: &[u8], max_bytes: usize) -> Result<RgbImage, ImageError> {
    if bytes.is_empty() {
        return Err(ImageError::Empty);
    }
    if bytes.len() > max_bytes {
        return Err(ImageError::TooLarge {
            size: bytes.len(),
            max: max_bytes,
        });
    }

    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

/// Resize to `size`×`size` and lay the pixels out as a normalised CHW float buffer.
pub fn to_chw_tensor(image: &RgbImage, size: u32) -> Vec<f32> {
    let resized = image::imageops::resize(image, size, size, FilterType::CatmullRom);
    let plane = (size * size) as usize;
    let mut data = vec![0.0f32; 3 * plane];

    for (x, y, pixel) in resized.enumerate_pixels() {
        let offset = (y * size + x) as usize;
        for channel in 0..3 {
            let value = pixel[channel] as f32 / 255.0;
            data[channel * plane + offset] = (value - IMAGE_MEAN[channel]) / IMAGE_STD[channel];
        }
    }

    data
}
