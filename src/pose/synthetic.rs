use anyhow::Result;
use opencv::core::Mat;

use super::detector::PoseBackend;
use super::landmark::{BBox, Landmark, Person};
use super::schema::ModelKind;

/// Deterministic single-person test skeleton for receiver preflight and
/// pipeline tests. Ignores the frame content; emits the 33-landmark schema
/// swaying on a fixed cycle so downstream clients can verify motion.
pub struct SyntheticDetector {
    tick: u64,
}

/// Rough humanoid base positions (x, y) for each of the 33 landmarks,
/// centered in the frame.
const BASE_POSITIONS: [(f32, f32); 33] = [
    (0.50, 0.12), // head
    (0.48, 0.11),
    (0.47, 0.11), // eye_l
    (0.46, 0.11),
    (0.52, 0.11),
    (0.53, 0.11), // eye_r
    (0.54, 0.11),
    (0.45, 0.12),
    (0.55, 0.12),
    (0.48, 0.15),
    (0.52, 0.15),
    (0.40, 0.25), // shoulder_l
    (0.60, 0.25), // shoulder_r
    (0.35, 0.38), // elbow_l
    (0.65, 0.38), // elbow_r
    (0.32, 0.50), // wrist_l
    (0.68, 0.50), // wrist_r
    (0.31, 0.53),
    (0.69, 0.53),
    (0.30, 0.54),
    (0.70, 0.54),
    (0.33, 0.53),
    (0.67, 0.53),
    (0.44, 0.52), // hip_l
    (0.56, 0.52), // hip_r
    (0.43, 0.70), // knee_l
    (0.57, 0.70), // knee_r
    (0.42, 0.88), // ankle_l
    (0.58, 0.88), // ankle_r
    (0.41, 0.92),
    (0.59, 0.92),
    (0.44, 0.93), // foot_l
    (0.56, 0.93), // foot_r
];

impl SyntheticDetector {
    pub fn new() -> Self {
        Self { tick: 0 }
    }
}

impl Default for SyntheticDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl PoseBackend for SyntheticDetector {
    fn process(&mut self, _frame: &Mat) -> Result<Vec<Person>> {
        let t = self.tick as f32 * 0.05;
        self.tick += 1;

        let sway_x = 0.05 * t.sin();
        let sway_y = 0.02 * (t * 1.3).cos();

        let landmarks: Vec<Landmark> = BASE_POSITIONS
            .iter()
            .enumerate()
            .map(|(i, &(bx, by))| {
                let phase = i as f32 * 0.2;
                let x = (bx + sway_x + 0.005 * (t + phase).sin()).clamp(0.0, 1.0);
                let y = (by + sway_y + 0.005 * (t + phase).cos()).clamp(0.0, 1.0);
                let z = 0.1 * (t + phase).sin();
                Landmark::new(x, y, z, 0.95)
            })
            .collect();

        let bbox = BBox::from_landmarks(&landmarks);
        Ok(vec![Person::new(1, landmarks, bbox)])
    }

    fn kind(&self) -> ModelKind {
        ModelKind::Synthetic
    }
}
