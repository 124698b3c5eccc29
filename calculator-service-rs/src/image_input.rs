//! Image input handling
//!
//! Turns the `image` field of a calculate request (a data URL of the form
//! `data:<mime>;base64,<payload>`) into an [`OpenedImage`]. Opening only
//! identifies the format from the leading bytes; pixels are decoded on
//! demand by whoever needs the bitmap.

use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat};

use crate::error::CalculatorError;

/// Return the payload after the first comma of a data URL.
///
/// The header before the comma (`data:image/png;base64`) is discarded
/// without inspection.
pub fn split_data_url(image: &str) -> Result<&str, CalculatorError> {
    image
        .split_once(',')
        .map(|(_, payload)| payload)
        .ok_or_else(|| {
            CalculatorError::MalformedInput(
                "image must be a data URL of the form data:<mime>;base64,<payload>".to_string(),
            )
        })
}

/// Decode a standard (padded) base64 payload. ASCII whitespace is ignored.
pub fn decode_base64_payload(payload: &str) -> Result<Vec<u8>, CalculatorError> {
    let compact: String = payload
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| CalculatorError::MalformedInput(format!("invalid base64 payload: {}", e)))
}

/// An encoded image whose format has been identified
#[derive(Debug, Clone)]
pub struct OpenedImage {
    format: ImageFormat,
    bytes: Vec<u8>,
}

impl OpenedImage {
    /// Identify the format of `bytes`, failing if it is not a known image type
    pub fn open(bytes: Vec<u8>) -> Result<Self, CalculatorError> {
        let format = image::guess_format(&bytes).map_err(|e| {
            CalculatorError::UnsupportedImage(format!(
                "cannot identify image from {} bytes: {}",
                bytes.len(),
                e
            ))
        })?;

        Ok(Self { format, bytes })
    }

    /// Split, base64-decode and open the `image` field of a request
    pub fn from_data_url(image: &str) -> Result<Self, CalculatorError> {
        let payload = split_data_url(image)?;
        let bytes = decode_base64_payload(payload)?;
        Self::open(bytes)
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn mime_type(&self) -> &'static str {
        self.format.to_mime_type()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Decode the full bitmap
    pub fn decode(&self) -> Result<DynamicImage, CalculatorError> {
        image::load_from_memory_with_format(&self.bytes, self.format).map_err(|e| {
            CalculatorError::UnsupportedImage(format!(
                "failed to decode {:?} image: {}",
                self.format, e
            ))
        })
    }

    /// Decode and re-encode as PNG
    pub fn to_png(&self) -> Result<Vec<u8>, CalculatorError> {
        let bitmap = self.decode()?;
        let mut buf = Cursor::new(Vec::new());
        bitmap.write_to(&mut buf, ImageFormat::Png).map_err(|e| {
            CalculatorError::UnsupportedImage(format!("failed to encode PNG: {}", e))
        })?;
        Ok(buf.into_inner())
    }
}
