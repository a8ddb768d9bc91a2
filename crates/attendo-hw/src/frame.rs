//! Frame type and pixel-format conversion to RGB.

use image::RgbImage;

/// Pixel layout of a frame's raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 8-bit packed B, G, R (OpenCV-style capture order).
    Bgr8,
    /// 8-bit packed R, G, B.
    Rgb8,
    /// YUYV 4:2:2 packed, 2 bytes per pixel.
    Yuyv,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgr8 | PixelFormat::Rgb8 => 3,
            PixelFormat::Yuyv => 2,
        }
    }
}

/// A captured camera frame.
#[derive(Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            data,
            width,
            height,
            format,
            timestamp: std::time::Instant::now(),
            sequence: 0,
        }
    }

    /// Wrap an RGB image without conversion.
    pub fn from_rgb(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height, PixelFormat::Rgb8)
    }

    /// Convert to an RGB image, the layout the face locator expects.
    pub fn to_rgb(&self) -> Result<RgbImage, FrameError> {
        let expected = self.width as usize * self.height as usize * self.format.bytes_per_pixel();
        if self.data.len() < expected {
            return Err(FrameError::InvalidLength {
                format: self.format,
                expected,
                actual: self.data.len(),
            });
        }
        let raw = &self.data[..expected];

        let rgb = match self.format {
            PixelFormat::Rgb8 => raw.to_vec(),
            PixelFormat::Bgr8 => raw.chunks_exact(3).flat_map(|p| [p[2], p[1], p[0]]).collect(),
            PixelFormat::Yuyv => yuyv_to_rgb(raw),
        };

        RgbImage::from_raw(self.width, self.height, rgb).ok_or(FrameError::InvalidLength {
            format: self.format,
            expected,
            actual: self.data.len(),
        })
    }
}

/// Convert packed YUYV to RGB with BT.601 limited-range coefficients.
///
/// Every 4 bytes `[Y0, U, Y1, V]` give two pixels sharing one chroma pair.
pub fn yuyv_to_rgb(yuyv: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(yuyv.len() / 2 * 3);
    for chunk in yuyv.chunks_exact(4) {
        let (u, v) = (chunk[1], chunk[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(chunk[0], u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(chunk[2], u, v));
    }
    rgb
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

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid {format:?} length: expected {expected}, got {actual}")]
    InvalidLength {
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },
}
