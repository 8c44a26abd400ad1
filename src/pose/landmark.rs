/// Single normalized body keypoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Landmark {
    /// Normalized X (0.0-1.0, relative to frame width)
    pub x: f32,
    /// Normalized Y (0.0-1.0, relative to frame height)
    pub y: f32,
    /// Relative depth, smaller = closer to camera. 0.0 for 2-D backends.
    pub z: f32,
    /// Detector confidence (0.0-1.0). 0.0 means absent/occluded.
    pub confidence: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32, confidence: f32) -> Self {
        Self { x, y, z, confidence }
    }

    pub fn is_valid(&self, threshold: f32) -> bool {
        self.confidence >= threshold
    }

    /// Convert to pixel coordinates.
    pub fn to_pixel(&self, width: u32, height: u32) -> (i32, i32) {
        let px = (self.x * width as f32) as i32;
        let py = (self.y * height as f32) as i32;
        (px, py)
    }
}

impl Default for Landmark {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            confidence: 0.0,
        }
    }
}

/// Normalized center-format bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub center_x: f32,
    pub center_y: f32,
    pub width: f32,
    pub height: f32,
}

impl BBox {
    /// Tight box around the given landmarks, or None when the slice is empty.
    pub fn from_landmarks(landmarks: &[Landmark]) -> Option<Self> {
        if landmarks.is_empty() {
            return None;
        }
        let mut min_x = f32::MAX;
        let mut min_y = f32::MAX;
        let mut max_x = f32::MIN;
        let mut max_y = f32::MIN;
        for lm in landmarks {
            min_x = min_x.min(lm.x);
            min_y = min_y.min(lm.y);
            max_x = max_x.max(lm.x);
            max_y = max_y.max(lm.y);
        }
        Some(Self {
            center_x: (min_x + max_x) / 2.0,
            center_y: (min_y + max_y) / 2.0,
            width: max_x - min_x,
            height: max_y - min_y,
        })
    }
}

/// One detected person. `person_id` values are dense starting at 1 within a
/// frame, in the order the detector reported them.
#[derive(Debug, Clone)]
pub struct Person {
    pub person_id: u32,
    pub landmarks: Vec<Landmark>,
    pub bbox: Option<BBox>,
}

impl Person {
    pub fn new(person_id: u32, landmarks: Vec<Landmark>, bbox: Option<BBox>) -> Self {
        Self {
            person_id,
            landmarks,
            bbox,
        }
    }

    pub fn average_confidence(&self) -> f32 {
        if self.landmarks.is_empty() {
            return 0.0;
        }
        let sum: f32 = self.landmarks.iter().map(|lm| lm.confidence).sum();
        sum / self.landmarks.len() as f32
    }
}
