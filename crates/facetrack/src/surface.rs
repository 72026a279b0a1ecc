//! The drawing surface: a fixed-size RGB canvas the live view is composited on.

use facetrack_core::{overlay, DetectionSnapshot, OverlayError, OverlayOptions};
use facetrack_hw::Frame;
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::path::Path;

pub struct Surface {
    canvas: RgbImage,
}

impl Surface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            canvas: RgbImage::new(width, height),
        }
    }

    pub fn size(&self) -> (u32, u32) {
        self.canvas.dimensions()
    }

    /// Paint `frame` over the whole surface, stretching it to fit.
    ///
    /// A frame whose buffer does not hold exactly `width * height` RGB pixels
    /// is skipped and the previous picture stays.
    pub fn draw_frame(&mut self, frame: &Frame) {
        let expected = frame.width as usize * frame.height as usize * 3;
        let view = match frame.as_image() {
            Some(view) if frame.data.len() == expected => view,
            _ => {
                tracing::warn!(
                    seq = frame.sequence,
                    width = frame.width,
                    height = frame.height,
                    bytes = frame.data.len(),
                    "frame buffer does not match its size; skipped"
                );
                return;
            }
        };
        if view.dimensions() == self.canvas.dimensions() {
            self.canvas.copy_from_slice(&frame.data);
        } else {
            self.canvas = imageops::resize(&view, self.canvas.width(), self.canvas.height(), FilterType::Triangle);
        }
    }

    /// Draw the held detection result, scaled into surface coordinates.
    pub fn draw_overlay(
        &mut self,
        snapshot: &DetectionSnapshot,
        options: OverlayOptions,
    ) -> Result<(), OverlayError> {
        let faces = snapshot.faces_for_surface(self.size());
        overlay::draw_overlay(&mut self.canvas, &faces, options)
    }

    pub fn image(&self) -> &RgbImage {
        &self.canvas
    }

    /// Write the current surface to an image file; format follows the extension.
    pub fn save(&self, path: &Path) -> Result<(), image::ImageError> {
        self.canvas.save(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facetrack_core::{BoundingBox, DetectionRequest, FaceDetection};

    fn solid_frame(width: u32, height: u32, rgb: [u8; 3]) -> Frame {
        let data = rgb.repeat((width * height) as usize);
        Frame::from_rgb(data, width, height, 1).unwrap()
    }

    #[test]
    fn test_frame_stretched_to_surface() {
        let mut surface = Surface::new(48, 34);
        surface.draw_frame(&solid_frame(64, 48, [10, 20, 30]));
        assert_eq!(surface.size(), (48, 34));
        assert_eq!(surface.image().get_pixel(20, 20).0, [10, 20, 30]);
    }

    #[test]
    fn test_same_size_frame_copied() {
        let mut surface = Surface::new(4, 2);
        surface.draw_frame(&solid_frame(4, 2, [1, 2, 3]));
        assert_eq!(surface.image().get_pixel(3, 1).0, [1, 2, 3]);
    }

    #[test]
    fn test_malformed_frame_keeps_previous_picture() {
        let mut surface = Surface::new(4, 2);
        surface.draw_frame(&solid_frame(4, 2, [1, 2, 3]));

        for data in [vec![9; 4 * 2 * 3 - 1], vec![9; 4 * 2 * 3 + 3]] {
            let short = Frame {
                data,
                width: 4,
                height: 2,
                timestamp: std::time::Instant::now(),
                sequence: 2,
            };
            surface.draw_frame(&short);
            assert_eq!(surface.image().get_pixel(3, 1).0, [1, 2, 3]);
        }
    }

    #[test]
    fn test_overlay_uses_surface_coordinates() {
        let mut surface = Surface::new(50, 50);
        surface.draw_frame(&solid_frame(100, 100, [0, 0, 0]));
        let snapshot = DetectionSnapshot {
            request: DetectionRequest::Faces,
            source_size: (100, 100),
            sequence: 1,
            faces: vec![FaceDetection {
                bbox: BoundingBox { x: 40.0, y: 40.0, width: 40.0, height: 40.0, confidence: 0.9 },
                landmarks: None,
                expressions: None,
            }],
        };
        surface.draw_overlay(&snapshot, OverlayOptions::default()).unwrap();
        // Box corner at (40, 40) in the frame lands on (20, 20) here.
        assert_ne!(surface.image().get_pixel(20, 20).0, [0, 0, 0]);
        assert_eq!(surface.image().get_pixel(30, 30).0, [0, 0, 0]);
    }

    #[test]
    fn test_save_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("surface.png");
        Surface::new(8, 8).save(&path).unwrap();
        assert!(path.exists());
    }
}
