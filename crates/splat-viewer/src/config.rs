use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use splat_render::{CameraState, Environment, RenderConfig, Transform};

use crate::asset::DecodeLimits;
use crate::orbit_controls::OrbitConfig;

/// Camera the viewer starts from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub position: [f32; 3],
    pub target: [f32; 3],
    pub fov_degrees: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            position: [0.0, 0.0, 2.0],
            target: [0.0, 0.0, 0.0],
            fov_degrees: 75.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl CameraConfig {
    pub fn with_position(mut self, position: [f32; 3]) -> Self {
        self.position = position;
        self
    }

    pub fn with_fov_degrees(mut self, fov_degrees: f32) -> Self {
        self.fov_degrees = fov_degrees;
        self
    }

    pub fn camera(&self) -> CameraState {
        CameraState::from_position(
            Vec3::from_array(self.position),
            Vec3::from_array(self.target),
            self.fov_degrees.to_radians(),
            self.near,
            self.far,
        )
    }
}

/// Where the loaded point cloud sits in the scene.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplatPlacement {
    pub translation: [f32; 3],
    /// Euler XYZ rotation in degrees.
    pub rotation_degrees: [f32; 3],
    pub scale: f32,
}

impl Default for SplatPlacement {
    fn default() -> Self {
        Self {
            translation: [0.0, 0.3, 0.0],
            rotation_degrees: [0.0; 3],
            scale: 20.0,
        }
    }
}

impl SplatPlacement {
    pub fn transform(&self) -> Transform {
        let [x, y, z] = self.rotation_degrees.map(f32::to_radians);
        Transform {
            translation: Vec3::from_array(self.translation),
            rotation: Quat::from_euler(glam::EulerRot::XYZ, x, y, z),
            scale: Vec3::splat(self.scale),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub camera: CameraConfig,
    pub orbit: OrbitConfig,
    pub environment: Environment,
    pub render: RenderConfig,
    pub splat: SplatPlacement,
    pub limits: DecodeLimits,
}

impl ViewerConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_camera(mut self, camera: CameraConfig) -> Self {
        self.camera = camera;
        self
    }

    pub fn with_orbit(mut self, orbit: OrbitConfig) -> Self {
        self.orbit = orbit;
        self
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_render(mut self, render: RenderConfig) -> Self {
        self.render = render;
        self
    }

    pub fn with_splat(mut self, splat: SplatPlacement) -> Self {
        self.splat = splat;
        self
    }

    pub fn with_limits(mut self, limits: DecodeLimits) -> Self {
        self.limits = limits;
        self
    }
}
