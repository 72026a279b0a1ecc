//! Small pixel helpers shared by the model preprocessors.

/// Bilinear resize of an interleaved image with `channels` bytes per pixel.
///
/// Uses pixel-center alignment so a uniform image stays uniform.
pub(crate) fn resize_bilinear(
    src: &[u8],
    channels: usize,
    width: usize,
    height: usize,
    new_w: usize,
    new_h: usize,
) -> Vec<u8> {
    let mut out = vec![0u8; new_w * new_h * channels];
    if width == 0 || height == 0 || new_w == 0 || new_h == 0 {
        return out;
    }
    let inv_x = width as f32 / new_w as f32;
    let inv_y = height as f32 / new_h as f32;

    for y in 0..new_h {
        let src_y = (y as f32 + 0.5) * inv_y - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
        let y1 = (y0 + 1).min(height - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..new_w {
            let src_x = (x as f32 + 0.5) * inv_x - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
            let x1 = (x0 + 1).min(width - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            for c in 0..channels {
                let px = |yy: usize, xx: usize| src[(yy * width + xx) * channels + c] as f32;
                let val = px(y0, x0) * (1.0 - fx) * (1.0 - fy)
                    + px(y0, x1) * fx * (1.0 - fy)
                    + px(y1, x0) * (1.0 - fx) * fy
                    + px(y1, x1) * fx * fy;
                out[(y * new_w + x) * channels + c] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    out
}

/// BT.601 luma of a packed RGB buffer.
pub(crate) fn rgb_to_luma(rgb: &[u8]) -> Vec<u8> {
    rgb.chunks_exact(3)
        .map(|p| (0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32).round() as u8)
        .collect()
}

/// Copy a rectangle out of a single-channel image, clamping to its bounds.
///
/// Returns the crop and its size, or `None` when the rectangle misses the image.
pub(crate) fn crop_gray(
    gray: &[u8],
    width: usize,
    height: usize,
    x: i64,
    y: i64,
    w: i64,
    h: i64,
) -> Option<(Vec<u8>, usize, usize)> {
    let x0 = x.clamp(0, width as i64) as usize;
    let y0 = y.clamp(0, height as i64) as usize;
    let x1 = (x + w).clamp(0, width as i64) as usize;
    let y1 = (y + h).clamp(0, height as i64) as usize;
    if x1 <= x0 || y1 <= y0 {
        return None;
    }

    let cw = x1 - x0;
    let mut out = Vec::with_capacity(cw * (y1 - y0));
    for row in y0..y1 {
        out.extend_from_slice(&gray[row * width + x0..row * width + x1]);
    }
    Some((out, cw, y1 - y0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bilinear_resize_uniform() {
        let frame = vec![128u8; 100 * 100 * 3];
        let resized = resize_bilinear(&frame, 3, 100, 100, 200, 150);
        assert_eq!(resized.len(), 200 * 150 * 3);
        assert!(resized.iter().all(|&p| p == 128), "uniform resize should stay uniform");
    }

    #[test]
    fn test_bilinear_downscale_averages() {
        // 2x1 gray [0, 255] down to 1x1 samples the midpoint.
        let resized = resize_bilinear(&[0, 255], 1, 2, 1, 1, 1);
        assert_eq!(resized, vec![128]);
    }

    #[test]
    fn test_luma_weights() {
        assert_eq!(rgb_to_luma(&[255, 255, 255, 0, 0, 0, 255, 0, 0]), vec![255, 0, 76]);
    }

    #[test]
    fn test_crop_clamps_to_bounds() {
        let gray: Vec<u8> = (0..16).collect(); // 4x4
        let (crop, w, h) = crop_gray(&gray, 4, 4, -1, 2, 3, 5).unwrap();
        assert_eq!((w, h), (2, 2));
        assert_eq!(crop, vec![8, 9, 12, 13]);
        assert!(crop_gray(&gray, 4, 4, 10, 10, 2, 2).is_none());
    }
}
