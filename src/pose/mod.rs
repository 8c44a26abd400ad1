pub mod detector;
pub mod landmark;
pub mod preprocess;
pub mod schema;
pub mod synthetic;

pub use detector::{create_detector, PoseBackend};
pub use landmark::{BBox, Landmark, Person};
pub use schema::{LandmarkSchema, ModelKind};
pub use synthetic::SyntheticDetector;
