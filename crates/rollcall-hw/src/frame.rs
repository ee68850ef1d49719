//! Pixel conversion of raw capture buffers to RGB: YUYV, GREY, MJPG.

use image::{ImageFormat, RgbImage};

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("MJPG decode failed: {0}")]
    Jpeg(#[from] image::ImageError),
    #[error("decoded MJPG is {actual:?}, expected {expected:?}")]
    SizeMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
}

/// Convert packed YUYV (4:2:2) to RGB using BT.601 limited-range coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V], sharing chroma.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = width as usize * height as usize * 2;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v));
    }

    RgbImage::from_raw(width, height, rgb).ok_or(FrameError::InvalidLength {
        expected,
        actual: yuyv.len(),
    })
}

fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    [
        clamp(298 * c + 409 * e),
        clamp(298 * c - 100 * d - 208 * e),
        clamp(298 * c + 516 * d),
    ]
}

/// Expand 8-bit grayscale to RGB by replicating the single channel.
pub fn grey_to_rgb(grey: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let pixels = width as usize * height as usize;
    if grey.len() < pixels {
        return Err(FrameError::InvalidLength {
            expected: pixels,
            actual: grey.len(),
        });
    }
    let rgb = grey[..pixels].iter().flat_map(|&p| [p, p, p]).collect();
    RgbImage::from_raw(width, height, rgb).ok_or(FrameError::InvalidLength {
        expected: pixels,
        actual: grey.len(),
    })
}

/// Decode a motion-JPEG buffer and check it has the negotiated size.
pub fn mjpeg_to_rgb(jpeg: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let image = image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg)?.into_rgb8();
    if image.dimensions() != (width, height) {
        return Err(FrameError::SizeMismatch {
            expected: (width, height),
            actual: image.dimensions(),
        });
    }
    Ok(image)
}
