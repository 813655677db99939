//! Decoded image buffers.
//!
//! - `Frame`: RGB8 pixel buffer decoded from an upload. Bytes are private.
//! - `Frame::run_backend`: the only path that hands pixels to a model runtime.
//!
//! A frame lives for a single request. Its own pixel buffer is zeroized on
//! drop; the request body and the decoder's intermediate image are not.

use std::io::Cursor;

use image::{ImageError, ImageReader, Limits};
use zeroize::Zeroize;

use crate::detect::{DetectorBackend, RawBoxes};
use crate::error::DetectError;

/// Upper bound on decoded pixel count (width * height).
pub const MAX_FRAME_PIXELS: u64 = 64 * 1024 * 1024;
/// Upper bound on either side of a decoded image.
pub const MAX_FRAME_DIMENSION: u32 = 16 * 1024;

/// Decoded RGB8 frame. There is no `Clone` and no byte accessor.
pub struct Frame {
    /// Private pixel data, row-major RGB8.
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Decode an uploaded image (any format enabled on the `image` crate).
    pub fn decode(bytes: &[u8]) -> Result<Self, DetectError> {
        Self::decode_limited(bytes, MAX_FRAME_PIXELS)
    }

    /// The pixel cap is checked against the header before any pixel data is
    /// decoded.
    fn decode_limited(bytes: &[u8], max_pixels: u64) -> Result<Self, DetectError> {
        if bytes.is_empty() {
            return Err(DetectError::InputMissing);
        }
        let (width, height) = image_reader(bytes)?.into_dimensions()?;
        if u64::from(width) * u64::from(height) > max_pixels {
            return Err(DetectError::InvalidFrame(format!(
                "image {}x{} exceeds {} pixels",
                width, height, max_pixels
            )));
        }

        let mut limits = Limits::default();
        limits.max_image_width = Some(MAX_FRAME_DIMENSION);
        limits.max_image_height = Some(MAX_FRAME_DIMENSION);
        let mut reader = image_reader(bytes)?;
        reader.limits(limits);
        let rgb = reader.decode()?.into_rgb8();
        Ok(Self {
            data: rgb.into_raw(),
            width,
            height,
        })
    }

    /// Wrap an already decoded RGB8 buffer.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32) -> Result<Self, DetectError> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| DetectError::InvalidFrame("frame dimensions overflow".to_string()))?;
        if data.len() != expected {
            return Err(DetectError::InvalidFrame(format!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Image size when both dimensions are known (non-zero).
    pub fn size(&self) -> Option<(u32, u32)> {
        if self.width == 0 || self.height == 0 {
            None
        } else {
            Some((self.width, self.height))
        }
    }

    /// Run a backend on this frame. The backend only borrows the pixels for
    /// the duration of the call.
    pub fn run_backend(
        &self,
        backend: &mut dyn DetectorBackend,
    ) -> anyhow::Result<Option<RawBoxes>> {
        backend.detect(&self.data, self.width, self.height)
    }
}

fn image_reader(bytes: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>, DetectError> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(ImageError::IoError)?;
    Ok(reader)
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.data.zeroize();
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}
