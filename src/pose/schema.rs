use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt;
use std::io::Write;
use std::path::Path;

/// COCO-17 keypoint names, in model output order.
pub const COCO17_NAMES: [&str; 17] = [
    "nose",
    "eye_l",
    "eye_r",
    "ear_l",
    "ear_r",
    "shoulder_l",
    "shoulder_r",
    "elbow_l",
    "elbow_r",
    "wrist_l",
    "wrist_r",
    "hip_l",
    "hip_r",
    "knee_l",
    "knee_r",
    "ankle_l",
    "ankle_r",
];

/// Skeleton connections for COCO-17 (start index, end index).
pub const COCO17_CONNECTIONS: [(usize, usize); 18] = [
    (5, 7),
    (7, 9),
    (6, 8),
    (8, 10),
    (11, 13),
    (13, 15),
    (12, 14),
    (14, 16),
    (5, 6),
    (11, 12),
    (5, 11),
    (6, 12),
    (0, 1),
    (0, 2),
    (1, 3),
    (2, 4),
    (5, 0),
    (6, 0),
];

/// MediaPipe-style 33 landmark names, in model output order.
pub const MEDIAPIPE33_NAMES: [&str; 33] = [
    "head",
    "mp_eye_inner_l",
    "eye_l",
    "mp_eye_outer_l",
    "mp_eye_inner_r",
    "eye_r",
    "mp_eye_outer_r",
    "mp_ear_l",
    "mp_ear_r",
    "mp_mouth_l",
    "mp_mouth_r",
    "shoulder_l",
    "shoulder_r",
    "elbow_l",
    "elbow_r",
    "wrist_l",
    "wrist_r",
    "mp_pinky_l",
    "mp_pinky_r",
    "handtip_l",
    "handtip_r",
    "thumb_l",
    "thumb_r",
    "hip_l",
    "hip_r",
    "knee_l",
    "knee_r",
    "ankle_l",
    "ankle_r",
    "mp_heel_l",
    "mp_heel_r",
    "foot_l",
    "foot_r",
];

/// Skeleton connections for the 33-landmark schema.
pub const MEDIAPIPE33_CONNECTIONS: [(usize, usize); 25] = [
    // Face
    (8, 6),
    (6, 5),
    (5, 4),
    (4, 0),
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 7),
    (9, 10),
    // Torso
    (11, 12),
    (11, 23),
    (12, 24),
    (23, 24),
    // Arms
    (11, 13),
    (13, 15),
    (12, 14),
    (14, 16),
    // Legs
    (23, 25),
    (25, 27),
    (27, 29),
    (29, 31),
    (24, 26),
    (26, 28),
    (28, 30),
    (30, 32),
];

/// Immutable landmark index -> name table. One per schema; regenerated for
/// clients via `write_mapping_file` whenever the active model changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandmarkSchema {
    Coco17,
    Mediapipe33,
}

impl LandmarkSchema {
    pub fn names(&self) -> &'static [&'static str] {
        match self {
            Self::Coco17 => &COCO17_NAMES,
            Self::Mediapipe33 => &MEDIAPIPE33_NAMES,
        }
    }

    /// Number of landmarks in this schema.
    pub fn count(&self) -> usize {
        self.names().len()
    }

    pub fn name(&self, index: usize) -> Option<&'static str> {
        self.names().get(index).copied()
    }

    pub fn connections(&self) -> &'static [(usize, usize)] {
        match self {
            Self::Coco17 => &COCO17_CONNECTIONS,
            Self::Mediapipe33 => &MEDIAPIPE33_CONNECTIONS,
        }
    }

    /// Write the `landmark_id,name` side-channel file for this schema.
    pub fn write_mapping_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut file = std::fs::File::create(path.as_ref())
            .with_context(|| format!("failed to create {}", path.as_ref().display()))?;
        for (id, name) in self.names().iter().enumerate() {
            writeln!(file, "{},{}", id, name)?;
        }
        Ok(())
    }
}

/// Selectable detector backend. Keys the factory in `pose::detector`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ModelKind {
    #[serde(rename = "movenet")]
    MoveNet,
    #[serde(rename = "yolo-pose")]
    YoloPose,
    #[serde(rename = "synthetic")]
    Synthetic,
}

impl ModelKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "movenet" => Some(Self::MoveNet),
            "yolo-pose" => Some(Self::YoloPose),
            "synthetic" => Some(Self::Synthetic),
            _ => None,
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            Self::MoveNet => "movenet",
            Self::YoloPose => "yolo-pose",
            Self::Synthetic => "synthetic",
        }
    }

    /// Human-readable model name published over telemetry.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::MoveNet => "MoveNet Lightning",
            Self::YoloPose => "YOLOv8n-pose",
            Self::Synthetic => "Synthetic Test Pattern",
        }
    }

    pub fn schema(&self) -> LandmarkSchema {
        match self {
            Self::MoveNet | Self::YoloPose => LandmarkSchema::Coco17,
            Self::Synthetic => LandmarkSchema::Mediapipe33,
        }
    }

    pub fn all() -> &'static [ModelKind] {
        &[Self::MoveNet, Self::YoloPose, Self::Synthetic]
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_sizes() {
        assert_eq!(LandmarkSchema::Coco17.count(), 17);
        assert_eq!(LandmarkSchema::Mediapipe33.count(), 33);
    }

    #[test]
    fn test_schema_names() {
        assert_eq!(LandmarkSchema::Coco17.name(0), Some("nose"));
        assert_eq!(LandmarkSchema::Coco17.name(16), Some("ankle_r"));
        assert_eq!(LandmarkSchema::Coco17.name(17), None);
        assert_eq!(LandmarkSchema::Mediapipe33.name(0), Some("head"));
        assert_eq!(LandmarkSchema::Mediapipe33.name(32), Some("foot_r"));
    }

    #[test]
    fn test_connections_in_range() {
        for schema in [LandmarkSchema::Coco17, LandmarkSchema::Mediapipe33] {
            for &(a, b) in schema.connections() {
                assert!(a < schema.count());
                assert!(b < schema.count());
            }
        }
    }

    #[test]
    fn test_model_kind_parse() {
        assert_eq!(ModelKind::parse("movenet"), Some(ModelKind::MoveNet));
        assert_eq!(ModelKind::parse("yolo-pose"), Some(ModelKind::YoloPose));
        assert_eq!(ModelKind::parse("synthetic"), Some(ModelKind::Synthetic));
        assert_eq!(ModelKind::parse("blazepose"), None);
        for kind in ModelKind::all() {
            assert_eq!(ModelKind::parse(kind.id()), Some(*kind));
        }
    }

    #[test]
    fn test_model_schema() {
        assert_eq!(ModelKind::MoveNet.schema(), LandmarkSchema::Coco17);
        assert_eq!(ModelKind::Synthetic.schema(), LandmarkSchema::Mediapipe33);
    }

    #[test]
    fn test_write_mapping_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("landmark_map.csv");
        LandmarkSchema::Coco17.write_mapping_file(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 17);
        assert_eq!(lines[0], "0,nose");
        assert_eq!(lines[16], "16,ankle_r");
    }
}
