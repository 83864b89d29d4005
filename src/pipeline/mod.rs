pub mod camera;
pub mod landmarks;
pub mod render;
pub mod rgba_converter;
pub mod worker;

pub use camera::{CameraStream, start_camera_stream};
pub use landmarks::{LandmarkSource, OrtLandmarkSource};
pub use render::Renderer;
pub use worker::{DetectionLoop, SessionCommand, SessionUpdate, start_detection_loop};
