//! Overlay drawing: boxes, landmark points, and labelled expression bars on
//! an RGB canvas.
//!
//! Everything clips silently at the canvas edge. The only failures are shape
//! mismatches: asking for landmarks or expressions that the held detection
//! result was not computed with.

use crate::types::{Expression, FaceDetection, OverlayOptions};
use embedded_graphics::mono_font::{ascii::FONT_6X10, MonoTextStyle};
use embedded_graphics::pixelcolor::Rgb888;
use embedded_graphics::prelude::*;
use embedded_graphics::text::{Baseline, Text};
use image::{Rgb, RgbImage};
use std::convert::Infallible;
use thiserror::Error;

/// Expressions below this probability are not drawn.
pub const MIN_EXPRESSION_PROBABILITY: f32 = 0.1;

const BOX_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const BOX_THICKNESS: i64 = 2;
const LANDMARK_POINT_COLOR: Rgb<u8> = Rgb([255, 0, 255]);
const LANDMARK_LINE_COLOR: Rgb<u8> = Rgb([0, 255, 255]);
const LANDMARK_POINT_RADIUS: i64 = 1;
const BAR_HEIGHT: i64 = 4;
const BAR_GAP: i64 = 2;
/// Glyph cell height of the label font.
const LABEL_HEIGHT: i64 = 10;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OverlayError {
    #[error("face {index} carries no landmarks")]
    MissingLandmarks { index: usize },
    #[error("face {index} carries no expressions")]
    MissingExpressions { index: usize },
}

/// Draw the full overlay in fixed order: boxes, then expressions, then landmarks.
///
/// Boxes are always drawn before an error is returned, so a mismatched
/// frame still shows where the faces are.
pub fn draw_overlay(
    canvas: &mut RgbImage,
    faces: &[FaceDetection],
    options: OverlayOptions,
) -> Result<(), OverlayError> {
    draw_detections(canvas, faces);
    if options.expressions {
        draw_expressions(canvas, faces)?;
    }
    if options.landmarks {
        draw_landmarks(canvas, faces)?;
    }
    Ok(())
}

pub fn draw_detections(canvas: &mut RgbImage, faces: &[FaceDetection]) {
    for face in faces {
        let b = face.bbox;
        stroke_rect(
            canvas,
            b.x.round() as i64,
            b.y.round() as i64,
            (b.x + b.width).round() as i64,
            (b.y + b.height).round() as i64,
            BOX_COLOR,
        );
    }
}

/// Landmark points, with the eye line and mouth line joined.
pub fn draw_landmarks(canvas: &mut RgbImage, faces: &[FaceDetection]) -> Result<(), OverlayError> {
    let all: Vec<_> = faces
        .iter()
        .enumerate()
        .map(|(index, f)| f.landmarks.ok_or(OverlayError::MissingLandmarks { index }))
        .collect::<Result<_, _>>()?;

    let pt = |p: (f32, f32)| (p.0.round() as i64, p.1.round() as i64);
    for lms in all {
        let [left_eye, right_eye, nose, left_mouth, right_mouth] = lms.map(pt);
        draw_line(canvas, left_eye, right_eye, LANDMARK_LINE_COLOR);
        draw_line(canvas, left_mouth, right_mouth, LANDMARK_LINE_COLOR);
        for (x, y) in [left_eye, right_eye, nose, left_mouth, right_mouth] {
            fill_rect(
                canvas,
                x - LANDMARK_POINT_RADIUS,
                y - LANDMARK_POINT_RADIUS,
                x + LANDMARK_POINT_RADIUS + 1,
                y + LANDMARK_POINT_RADIUS + 1,
                LANDMARK_POINT_COLOR,
            );
        }
    }
    Ok(())
}

/// One labelled bar per sufficiently likely expression, stacked under the
/// face box, most likely first. Each row is the label text ("happiness 87%")
/// with a bar under it whose length is the probability times the box width.
pub fn draw_expressions(canvas: &mut RgbImage, faces: &[FaceDetection]) -> Result<(), OverlayError> {
    let all: Vec<_> = faces
        .iter()
        .enumerate()
        .map(|(index, f)| {
            f.expressions
                .as_ref()
                .map(|e| (f.bbox, e))
                .ok_or(OverlayError::MissingExpressions { index })
        })
        .collect::<Result<_, _>>()?;

    for (bbox, expressions) in all {
        let mut ranked: Vec<(Expression, f32)> = expressions
            .iter()
            .filter(|&(_, p)| p >= MIN_EXPRESSION_PROBABILITY)
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let x0 = bbox.x.round() as i64;
        let mut y = (bbox.y + bbox.height).round() as i64 + BOX_THICKNESS + BAR_GAP;
        for (expression, p) in ranked {
            let color = expression_color(expression);
            draw_text(canvas, x0, y, &expression_label(expression, p), color);
            y += LABEL_HEIGHT;

            let len = ((bbox.width * p).round() as i64).max(1);
            fill_rect(canvas, x0, y, x0 + len, y + BAR_HEIGHT, color);
            y += BAR_HEIGHT + BAR_GAP;
        }
    }
    Ok(())
}

/// Text shown above an expression bar, e.g. "happiness 87%".
pub fn expression_label(expression: Expression, probability: f32) -> String {
    format!("{} {:.0}%", expression.label(), probability * 100.0)
}

/// Draw `text` in the 6×10 bitmap font with its top-left corner at (x, y).
///
/// Characters outside printable ASCII render as the font's replacement glyph.
pub fn draw_text(canvas: &mut RgbImage, x: i64, y: i64, text: &str, color: Rgb<u8>) {
    let [r, g, b] = color.0;
    let style = MonoTextStyle::new(&FONT_6X10, Rgb888::new(r, g, b));
    let origin = Point::new(x as i32, y as i32);
    Text::with_baseline(text, origin, style, Baseline::Top)
        .draw(&mut ClippedCanvas(canvas))
        .map(|_| ())
        .unwrap_or_else(|never| match never {});
}

/// `DrawTarget` over an `RgbImage` that drops pixels outside the image.
struct ClippedCanvas<'a>(&'a mut RgbImage);

impl OriginDimensions for ClippedCanvas<'_> {
    fn size(&self) -> Size {
        Size::new(self.0.width(), self.0.height())
    }
}

impl DrawTarget for ClippedCanvas<'_> {
    type Color = Rgb888;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            put(self.0, point.x as i64, point.y as i64, Rgb([color.r(), color.g(), color.b()]));
        }
        Ok(())
    }
}

/// Fixed colour per expression label.
pub fn expression_color(expression: Expression) -> Rgb<u8> {
    match expression {
        Expression::Neutral => Rgb([200, 200, 200]),
        Expression::Happiness => Rgb([255, 215, 0]),
        Expression::Surprise => Rgb([255, 140, 0]),
        Expression::Sadness => Rgb([30, 144, 255]),
        Expression::Anger => Rgb([220, 20, 60]),
        Expression::Disgust => Rgb([50, 205, 50]),
        Expression::Fear => Rgb([148, 0, 211]),
        Expression::Contempt => Rgb([139, 69, 19]),
    }
}

fn put(canvas: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < canvas.width() && (y as u32) < canvas.height() {
        canvas.put_pixel(x as u32, y as u32, color);
    }
}

/// Fill the half-open rectangle [x0, x1) × [y0, y1).
fn fill_rect(canvas: &mut RgbImage, x0: i64, y0: i64, x1: i64, y1: i64, color: Rgb<u8>) {
    let xs = x0.max(0)..x1.min(canvas.width() as i64);
    let ys = y0.max(0)..y1.min(canvas.height() as i64);
    for y in ys {
        for x in xs.clone() {
            canvas.put_pixel(x as u32, y as u32, color);
        }
    }
}

/// Outline drawn inward from the given corners.
fn stroke_rect(canvas: &mut RgbImage, x0: i64, y0: i64, x1: i64, y1: i64, color: Rgb<u8>) {
    let t = BOX_THICKNESS;
    fill_rect(canvas, x0, y0, x1, y0 + t, color);
    fill_rect(canvas, x0, y1 - t, x1, y1, color);
    fill_rect(canvas, x0, y0, x0 + t, y1, color);
    fill_rect(canvas, x1 - t, y0, x1, y1, color);
}

/// Bresenham line, endpoints included.
fn draw_line(canvas: &mut RgbImage, from: (i64, i64), to: (i64, i64), color: Rgb<u8>) {
    let (mut x, mut y) = from;
    let dx = (to.0 - x).abs();
    let dy = -(to.1 - y).abs();
    let sx = if x < to.0 { 1 } else { -1 };
    let sy = if y < to.1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        put(canvas, x, y, color);
        if (x, y) == to {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}
