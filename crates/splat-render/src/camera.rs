use glam::{Mat4, Vec3};

/// Orbit camera: a point on a sphere of `radius` around `target`.
///
/// `azimuth` is measured around +Y starting from +Z, `polar` from +Y down.
/// Written only by the orbit controller; the renderer reads it once per frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraState {
    pub target: Vec3,
    pub azimuth: f32,
    pub polar: f32,
    pub radius: f32,
    /// Vertical field of view in radians.
    pub fov: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for CameraState {
    fn default() -> Self {
        Self::from_position(Vec3::new(0.0, 0.0, 2.0), Vec3::ZERO, 75f32.to_radians(), 0.1, 1000.0)
    }
}

impl CameraState {
    /// Express a camera placed at `position` looking at `target` in orbit coordinates.
    pub fn from_position(position: Vec3, target: Vec3, fov: f32, near: f32, far: f32) -> Self {
        let offset = position - target;
        let radius = offset.length();
        let (azimuth, polar) = if radius > 0.0 {
            (
                offset.x.atan2(offset.z),
                (offset.y / radius).clamp(-1.0, 1.0).acos(),
            )
        } else {
            (0.0, std::f32::consts::FRAC_PI_2)
        };

        Self {
            target,
            azimuth,
            polar,
            radius,
            fov,
            near,
            far,
        }
    }

    /// Unit vector from the target towards the camera.
    pub fn orbit_direction(&self) -> Vec3 {
        let (sin_az, cos_az) = self.azimuth.sin_cos();
        let (sin_polar, cos_polar) = self.polar.sin_cos();
        Vec3::new(sin_polar * sin_az, cos_polar, sin_polar * cos_az)
    }

    pub fn position(&self) -> Vec3 {
        self.target + self.orbit_direction() * self.radius
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position(), self.target, Vec3::Y)
    }

    pub fn local_to_world(&self) -> Mat4 {
        self.view_matrix().inverse()
    }

    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov, aspect, self.near, self.far)
    }

    /// Focal length in pixels for an image `height` pixels tall.
    pub fn focal(&self, height: u32) -> f32 {
        fov_to_focal(self.fov, height)
    }
}

// Converts field of view to focal length
pub fn fov_to_focal(fov_rad: f32, pixels: u32) -> f32 {
    0.5 * (pixels as f32) / (fov_rad * 0.5).tan()
}

// Converts focal length to field of view.
pub fn focal_to_fov(focal: f32, pixels: u32) -> f32 {
    2.0 * ((pixels as f32) / (2.0 * focal)).atan()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_page_camera() {
        let cam = CameraState::default();
        assert!((cam.position() - Vec3::new(0.0, 0.0, 2.0)).length() < 1e-5);
        assert!((cam.polar - std::f32::consts::FRAC_PI_2).abs() < 1e-6);
        assert_eq!(cam.azimuth, 0.0);
    }

    #[test]
    fn position_roundtrips_through_spherical() {
        let pos = Vec3::new(1.5, -0.75, -2.0);
        let target = Vec3::new(0.1, 0.2, 0.3);
        let cam = CameraState::from_position(pos, target, 1.0, 0.1, 100.0);
        assert!((cam.position() - pos).length() < 1e-4);
    }

    #[test]
    fn view_looks_at_target() {
        let cam = CameraState {
            azimuth: 0.7,
            polar: 1.1,
            ..Default::default()
        };
        let in_view = cam.view_matrix().transform_point3(cam.target);
        assert!(in_view.x.abs() < 1e-5 && in_view.y.abs() < 1e-5);
        assert!((in_view.z + cam.radius).abs() < 1e-4);
    }

    #[test]
    fn focal_fov_inverse() {
        let focal = fov_to_focal(0.8, 600);
        assert!((focal_to_fov(focal, 600) - 0.8).abs() < 1e-5);
    }
}
