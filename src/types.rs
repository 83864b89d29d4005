use std::{fmt::Write as _, time::Instant};

pub const NUM_LANDMARKS: usize = 21;

/// (x, y, z) in video pixels. z is relative depth in the same scale as x/y.
pub type Landmark = [f32; 3];

#[derive(Clone, Debug)]
pub struct Frame {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
}

impl Frame {
    pub fn new(rgba: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            rgba,
            width,
            height,
            timestamp: Instant::now(),
        }
    }

    pub fn expected_len(&self) -> usize {
        (self.width as usize)
            .saturating_mul(self.height as usize)
            .saturating_mul(4)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Finger {
    Thumb,
    Index,
    Middle,
    Ring,
    Pinky,
}

impl Finger {
    pub const ALL: [Finger; 5] = [
        Finger::Thumb,
        Finger::Index,
        Finger::Middle,
        Finger::Ring,
        Finger::Pinky,
    ];

    /// Landmark indices from knuckle to tip in the 21-point hand layout.
    pub fn indices(&self) -> [usize; 4] {
        match self {
            Finger::Thumb => [1, 2, 3, 4],
            Finger::Index => [5, 6, 7, 8],
            Finger::Middle => [9, 10, 11, 12],
            Finger::Ring => [13, 14, 15, 16],
            Finger::Pinky => [17, 18, 19, 20],
        }
    }
}

pub const PALM_BASE_INDEX: usize = 0;

/// Named landmark groups of one detected hand.
#[derive(Clone, Debug, PartialEq)]
pub struct HandAnnotations {
    pub palm_base: Landmark,
    pub fingers: [(Finger, Vec<Landmark>); 5],
}

impl HandAnnotations {
    pub fn from_landmarks(landmarks: &[Landmark]) -> Option<Self> {
        if landmarks.len() < NUM_LANDMARKS {
            return None;
        }
        let group = |finger: Finger| {
            let points = finger.indices().iter().map(|&i| landmarks[i]).collect();
            (finger, points)
        };
        Some(Self {
            palm_base: landmarks[PALM_BASE_INDEX],
            fingers: Finger::ALL.map(group),
        })
    }

    pub fn finger(&self, finger: Finger) -> &[Landmark] {
        self.fingers
            .iter()
            .find(|(f, _)| *f == finger)
            .map(|(_, points)| points.as_slice())
            .unwrap_or(&[])
    }

    /// Finger path with the palm base prepended, as drawn on screen.
    pub fn finger_path(&self, finger: Finger) -> Vec<Landmark> {
        let mut path = Vec::with_capacity(5);
        path.push(self.palm_base);
        path.extend_from_slice(self.finger(finger));
        path
    }
}

#[derive(Clone, Debug)]
pub struct HandDetection {
    pub landmarks: Vec<Landmark>,
    pub annotations: HandAnnotations,
    pub confidence: f32,
    pub handedness: f32,
}

impl HandDetection {
    pub fn new(landmarks: Vec<Landmark>, confidence: f32, handedness: f32) -> Option<Self> {
        if landmarks.len() != NUM_LANDMARKS {
            return None;
        }
        let annotations = HandAnnotations::from_landmarks(&landmarks)?;
        Some(Self {
            landmarks,
            annotations,
            confidence,
            handedness,
        })
    }

    /// Landmarks concatenated as x0, y0, z0, x1, ...
    pub fn flatten(&self) -> Vec<f32> {
        flatten_landmarks(&self.landmarks)
    }
}

pub fn flatten_landmarks(landmarks: &[Landmark]) -> Vec<f32> {
    landmarks.iter().flat_map(|point| point.iter().copied()).collect()
}

/// Comma separated vector, the format shown in the log panel.
pub fn format_vector(values: &[f32]) -> String {
    let mut out = String::with_capacity(values.len() * 8);
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let _ = write!(out, "{value}");
    }
    out
}

#[cfg(test)]
pub(crate) fn synthetic_landmarks(offset: f32) -> Vec<Landmark> {
    (0..NUM_LANDMARKS)
        .map(|i| {
            let i = i as f32;
            [offset + i, offset + i * 2.0, -i * 0.1]
        })
        .collect()
}
