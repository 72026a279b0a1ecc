//! Frame type and pixel conversion from YUYV/GREY/MJPG to packed RGB.

/// A captured camera frame in packed RGB (3 bytes per pixel).
#[derive(Clone)]
pub struct Frame {
    /// RGB pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    /// Wrap packed RGB data, validating the buffer length.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Result<Self, FrameError> {
        let expected = (width * height * 3) as usize;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
        })
    }

    /// Borrow the frame as an `image` buffer without copying.
    pub fn as_image(&self) -> Option<image::ImageBuffer<image::Rgb<u8>, &[u8]>> {
        image::ImageBuffer::from_raw(self.width, self.height, self.data.as_slice())
    }
}

/// Convert packed YUYV (4:2:2) to RGB using BT.601 limited-range coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U/V.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let pixels = (width * height) as usize;
    let mut rgb = Vec::with_capacity(pixels * 3);
    for quad in yuyv[..expected].chunks(4) {
        let u = quad[1] as f32 - 128.0;
        // An odd pixel count leaves a trailing [Y, U] pair with no V sample.
        let v = quad.get(3).map_or(0.0, |&v| v as f32 - 128.0);
        for &y in quad.iter().step_by(2) {
            let c = 1.164 * (y as f32 - 16.0);
            rgb.push((c + 1.596 * v).round().clamp(0.0, 255.0) as u8);
            rgb.push((c - 0.392 * u - 0.813 * v).round().clamp(0.0, 255.0) as u8);
            rgb.push((c + 2.017 * u).round().clamp(0.0, 255.0) as u8);
        }
    }
    Ok(rgb)
}

/// Expand 8-bit grayscale to RGB by replicating each sample.
pub fn grey_to_rgb(gray: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let pixels = (width * height) as usize;
    if gray.len() < pixels {
        return Err(FrameError::InvalidLength {
            expected: pixels,
            actual: gray.len(),
        });
    }
    Ok(gray[..pixels].iter().flat_map(|&g| [g, g, g]).collect())
}

/// Decode a Motion-JPEG buffer into RGB, checking it matches the negotiated size.
pub fn mjpeg_to_rgb(jpeg: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let decoded = image::load_from_memory_with_format(jpeg, image::ImageFormat::Jpeg)
        .map_err(|e| FrameError::Decode(e.to_string()))?
        .to_rgb8();
    if decoded.width() != width || decoded.height() != height {
        return Err(FrameError::SizeMismatch {
            expected: (width, height),
            actual: (decoded.width(), decoded.height()),
        });
    }
    Ok(decoded.into_raw())
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("MJPG decode failed: {0}")]
    Decode(String),
    #[error("decoded frame is {actual:?}, negotiated {expected:?}")]
    SizeMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_to_rgb_neutral_chroma() {
        // 2x1 image with U=V=128: chroma contributes nothing, output is gray.
        let yuyv = vec![16, 128, 235, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb, vec![0, 0, 0, 255, 255, 255]);
    }

    #[test]
    fn test_yuyv_to_rgb_red_dominant() {
        // High V pushes red up and green down.
        let yuyv = vec![128, 128, 128, 240];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert!(rgb[0] > rgb[1]);
        assert!(rgb[0] > rgb[2]);
        assert_eq!(&rgb[..3], &rgb[3..]);
    }

    #[test]
    fn test_yuyv_odd_pixel_count() {
        // 3x1: one full pair plus a trailing [Y, U] pair.
        let yuyv = vec![16, 128, 235, 128, 235, 128];
        let rgb = yuyv_to_rgb(&yuyv, 3, 1).unwrap();
        assert_eq!(rgb.len(), 3 * 3);
        assert_eq!(&rgb[6..], &[255, 255, 255]);
        assert!(Frame::from_rgb(rgb, 3, 1, 0).is_ok());
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let yuyv = vec![100, 128];
        assert!(matches!(
            yuyv_to_rgb(&yuyv, 2, 1),
            Err(FrameError::InvalidLength { expected: 4, actual: 2 })
        ));
    }

    #[test]
    fn test_grey_to_rgb_replicates() {
        let rgb = grey_to_rgb(&[7, 200], 2, 1).unwrap();
        assert_eq!(rgb, vec![7, 7, 7, 200, 200, 200]);
    }

    #[test]
    fn test_mjpeg_roundtrip_size() {
        let img = image::RgbImage::from_pixel(8, 4, image::Rgb([90, 120, 200]));
        let mut jpeg = Vec::new();
        image::codecs::jpeg::JpegEncoder::new(&mut jpeg)
            .encode_image(&img)
            .unwrap();

        let rgb = mjpeg_to_rgb(&jpeg, 8, 4).unwrap();
        assert_eq!(rgb.len(), 8 * 4 * 3);

        assert!(matches!(
            mjpeg_to_rgb(&jpeg, 16, 4),
            Err(FrameError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn test_frame_from_rgb_validates_length() {
        assert!(Frame::from_rgb(vec![0; 12], 2, 2, 0).is_ok());
        assert!(Frame::from_rgb(vec![0; 11], 2, 2, 0).is_err());
    }
}
