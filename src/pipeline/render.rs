use rayon::prelude::*;

use crate::types::{Finger, Frame, HandDetection, Landmark};

const POINT_RADIUS: i32 = 3;
const PATH_THICKNESS: i32 = 2;
const HAND_COLOR: [u8; 4] = [255, 0, 0, 255];

/// Horizontal flip applied once when the canvas is set up: translate by the
/// canvas width, then scale x by -1.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    flip_width: Option<f32>,
}

impl Transform {
    pub fn identity() -> Self {
        Self { flip_width: None }
    }

    pub fn mirrored(width: u32) -> Self {
        Self {
            flip_width: Some(width as f32),
        }
    }

    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        match self.flip_width {
            Some(width) => (width - x, y),
            None => (x, y),
        }
    }

    fn source_column(&self, column: u32, width: u32) -> u32 {
        match self.flip_width {
            Some(_) => width - 1 - column,
            None => column,
        }
    }
}

/// RGBA drawing surface with the session's transform baked in.
pub struct Canvas<'a> {
    buffer: &'a mut [u8],
    width: u32,
    height: u32,
    transform: Transform,
}

impl<'a> Canvas<'a> {
    pub fn new(buffer: &'a mut [u8], width: u32, height: u32, transform: Transform) -> Self {
        Self {
            buffer,
            width,
            height,
            transform,
        }
    }

    /// Copies the video frame onto the canvas through the transform.
    pub fn draw_frame(&mut self, frame: &Frame) {
        let width = self.width.min(frame.width);
        let height = self.height.min(frame.height);
        let transform = self.transform;
        let dst_stride = self.width as usize * 4;
        let src_stride = frame.width as usize * 4;

        self.buffer
            .par_chunks_mut(dst_stride)
            .take(height as usize)
            .enumerate()
            .for_each(|(row, dst_row)| {
                let src_row = &frame.rgba[row * src_stride..(row + 1) * src_stride];
                for column in 0..width {
                    let src = transform.source_column(column, frame.width) as usize * 4;
                    let dst = column as usize * 4;
                    dst_row[dst..dst + 4].copy_from_slice(&src_row[src..src + 4]);
                }
            });
    }

    pub fn fill_point(&mut self, point: (f32, f32), radius: i32, color: [u8; 4]) {
        let (cx, cy) = self.transform.apply(point.0, point.1);
        let (cx, cy) = (cx.round() as i32, cy.round() as i32);
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                if dx * dx + dy * dy <= radius * radius {
                    self.put_pixel(cx + dx, cy + dy, color);
                }
            }
        }
    }

    /// Connected polyline through `points`; the last point is not joined back
    /// to the first.
    pub fn stroke_path(&mut self, points: &[(f32, f32)], thickness: i32, color: [u8; 4]) {
        for pair in points.windows(2) {
            let a = self.transform.apply(pair[0].0, pair[0].1);
            let b = self.transform.apply(pair[1].0, pair[1].1);
            self.line(a, b, thickness, color);
        }
    }

    fn line(&mut self, p0: (f32, f32), p1: (f32, f32), thickness: i32, color: [u8; 4]) {
        let (mut x0, mut y0) = (p0.0.round() as i32, p0.1.round() as i32);
        let (x1, y1) = (p1.0.round() as i32, p1.1.round() as i32);
        let dx = (x1 - x0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let dy = -(y1 - y0).abs();
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        let radius = (thickness.max(1) - 1) / 2;

        loop {
            for ox in -radius..=radius {
                for oy in -radius..=radius {
                    if ox.abs() + oy.abs() <= radius {
                        self.put_pixel(x0 + ox, y0 + oy, color);
                    }
                }
            }
            if x0 == x1 && y0 == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x0 += sx;
            }
            if e2 <= dx {
                err += dx;
                y0 += sy;
            }
        }
    }

    fn put_pixel(&mut self, x: i32, y: i32, color: [u8; 4]) {
        if x < 0 || y < 0 || x as u32 >= self.width || y as u32 >= self.height {
            return;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        if let Some(px) = self.buffer.get_mut(idx..idx + 4) {
            px.copy_from_slice(&color);
        }
    }
}

#[derive(Clone, Debug)]
pub struct Renderer {
    mirror: bool,
}

impl Renderer {
    pub fn new(mirror: bool) -> Self {
        Self { mirror }
    }

    pub fn transform_for(&self, width: u32) -> Transform {
        if self.mirror {
            Transform::mirrored(width)
        } else {
            Transform::identity()
        }
    }

    /// Draws the frame and, when present, the hand on top of it.
    pub fn render(&self, frame: &Frame, hand: Option<&HandDetection>) -> Frame {
        let mut rgba = vec![0u8; frame.expected_len()];
        if frame.rgba.len() == rgba.len() {
            let mut canvas = Canvas::new(
                &mut rgba,
                frame.width,
                frame.height,
                self.transform_for(frame.width),
            );
            canvas.draw_frame(frame);
            if let Some(hand) = hand {
                draw_hand(&mut canvas, hand);
            }
        } else {
            log::warn!(
                "frame buffer size mismatch: got {}, expected {}",
                frame.rgba.len(),
                rgba.len()
            );
        }

        Frame {
            rgba,
            width: frame.width,
            height: frame.height,
            timestamp: frame.timestamp,
        }
    }
}

pub fn draw_hand(canvas: &mut Canvas<'_>, hand: &HandDetection) {
    for landmark in &hand.landmarks {
        canvas.fill_point(to_canvas(landmark), POINT_RADIUS, HAND_COLOR);
    }

    for finger in Finger::ALL {
        let path: Vec<(f32, f32)> = hand
            .annotations
            .finger_path(finger)
            .iter()
            .map(to_canvas)
            .collect();
        canvas.stroke_path(&path, PATH_THICKNESS, HAND_COLOR);
    }
}

/// Drops z; the canvas transform takes care of mirroring.
fn to_canvas(landmark: &Landmark) -> (f32, f32) {
    (landmark[0], landmark[1])
}
