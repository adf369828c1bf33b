pub mod camera;
pub mod environment;
pub mod point_cloud;
pub mod render;
pub mod scene;
pub mod surface;

mod layout_check;

pub use camera::CameraState;
pub use environment::{Background, Environment, EnvironmentPreset};
pub use layout_check::LayoutError;
pub use point_cloud::{PointCloud, PointCloudBuilder, PointCloudId, Splat};
pub use render::{FrameStats, RenderConfig, Renderer};
pub use scene::{EntityId, EntityKind, SceneEntity, SceneGraph, Transform};
pub use surface::{channel_surface, ChannelSurface, RenderSurface, SurfaceHost};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("render surface unavailable: {0}")]
    SurfaceUnavailable(String),
    #[error("failed to start render workers: {0}")]
    Workers(String),
}
