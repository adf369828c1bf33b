pub mod asset;
pub mod config;
pub mod frame_loop;
pub mod orbit_controls;
pub mod splat_import;
pub mod viewer;

pub use asset::{
    AssetError, AssetLoader, AssetSource, CancelToken, DecodeLimits, FileSource, MemorySource,
    PointCloudDecoder,
};
pub use config::{CameraConfig, SplatPlacement, ViewerConfig};
pub use frame_loop::FrameLoop;
pub use orbit_controls::{OrbitConfig, OrbitController, PointerButton, PointerEvent};
pub use splat_import::{PlyDecoder, RawSplatDecoder};
pub use viewer::{LoadStatus, ViewerController, ViewerFailure};
