//! Transport codec for image payloads.
//!
//! Payloads travel as standard base64. Faces are stored and forwarded as
//! JPEG, matching the `<stem>_face.jpg` artifacts the detection stage writes.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, DynamicImage};
use thiserror::Error;

const JPEG_QUALITY: u8 = 95;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("payload is not a decodable image: {0}")]
    Image(#[from] image::ImageError),
}

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("cannot encode {color:?} image of {width}x{height}; expected non-empty 8-bit RGB")]
    InvalidBuffer {
        color: ColorType,
        width: u32,
        height: u32,
    },
    #[error("jpeg encoding failed: {0}")]
    Jpeg(#[from] image::ImageError),
}

/// Decode a base64 payload into raw file bytes.
pub fn decode_payload(encoded: &str) -> Result<Vec<u8>, DecodeError> {
    Ok(STANDARD.decode(encoded.trim())?)
}

/// Decode raw image file bytes (any format the `image` crate sniffs).
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, DecodeError> {
    Ok(image::load_from_memory(bytes)?)
}

/// Decode a base64 image payload.
pub fn decode(encoded: &str) -> Result<DynamicImage, DecodeError> {
    decode_image(&decode_payload(encoded)?)
}

/// Encode raw bytes for transport.
pub fn encode_payload(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Encode an RGB image as JPEG bytes.
pub fn encode_image(image: &DynamicImage) -> Result<Vec<u8>, EncodeError> {
    let rgb = match image.as_rgb8() {
        Some(rgb) if rgb.width() > 0 && rgb.height() > 0 => rgb,
        _ => {
            return Err(EncodeError::InvalidBuffer {
                color: image.color(),
                width: image.width(),
                height: image.height(),
            })
        }
    };

    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY).encode_image(rgb)?;
    Ok(bytes)
}

/// Encode an RGB image as a base64 JPEG payload.
pub fn encode(image: &DynamicImage) -> Result<String, EncodeError> {
    Ok(encode_payload(&encode_image(image)?))
}
