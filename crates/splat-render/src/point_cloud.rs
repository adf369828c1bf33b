use std::sync::atomic::{AtomicU64, Ordering};

use glam::{Mat3, Quat, Vec3, Vec4};

use crate::layout_check::{LayoutCheck, LayoutError};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one decoded point cloud. Renderers key their uploaded buffers on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PointCloudId(u64);

/// A single decoded splat.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Splat {
    pub position: Vec3,
    /// Straight RGBA in [0, 1].
    pub color: Vec4,
    pub scale: Vec3,
    pub rotation: Quat,
    pub opacity: f32,
}

/// Decoded splat asset stored as parallel per-point arrays.
///
/// Construction validates the layout: every array has `count` entries, opacities
/// and colors lie in [0, 1], scales are strictly positive and rotations are unit
/// quaternions. There is no way to build a partially populated cloud.
#[derive(Debug)]
pub struct PointCloud {
    id: PointCloudId,
    positions: Vec<Vec3>,
    colors: Vec<Vec4>,
    scales: Vec<Vec3>,
    rotations: Vec<Quat>,
    opacities: Vec<f32>,
}

impl PointCloud {
    pub fn from_parts(
        positions: Vec<Vec3>,
        colors: Vec<Vec4>,
        scales: Vec<Vec3>,
        mut rotations: Vec<Quat>,
        opacities: Vec<f32>,
    ) -> Result<Self, LayoutError> {
        LayoutCheck::new()
            .check_len("position", positions.len())
            .check_len("color", colors.len())
            .check_len("scale", scales.len())
            .check_len("rotation", rotations.len())
            .check_len("opacity", opacities.len())
            .finish()?;

        for index in 0..positions.len() {
            if !positions[index].is_finite() {
                return Err(LayoutError::NonFinite {
                    attribute: "position",
                    index,
                });
            }

            let color = colors[index];
            if !color.is_finite() {
                return Err(LayoutError::NonFinite {
                    attribute: "color",
                    index,
                });
            }
            if color.min_element() < 0.0 || color.max_element() > 1.0 {
                return Err(LayoutError::ColorOutOfRange { index });
            }

            let scale = scales[index];
            if !scale.is_finite() {
                return Err(LayoutError::NonFinite {
                    attribute: "scale",
                    index,
                });
            }
            if scale.min_element() <= 0.0 {
                return Err(LayoutError::NonPositiveScale { index });
            }

            let opacity = opacities[index];
            if !opacity.is_finite() {
                return Err(LayoutError::NonFinite {
                    attribute: "opacity",
                    index,
                });
            }
            if !(0.0..=1.0).contains(&opacity) {
                return Err(LayoutError::OpacityOutOfRange {
                    index,
                    value: opacity,
                });
            }

            let rotation = rotations[index];
            if !rotation.is_finite() {
                return Err(LayoutError::NonFinite {
                    attribute: "rotation",
                    index,
                });
            }
            if rotation.length_squared() < 1e-12 {
                return Err(LayoutError::DegenerateRotation { index });
            }
            rotations[index] = rotation.normalize();
        }

        Ok(Self {
            id: PointCloudId(NEXT_ID.fetch_add(1, Ordering::Relaxed)),
            positions,
            colors,
            scales,
            rotations,
            opacities,
        })
    }

    pub fn from_splats(splats: impl IntoIterator<Item = Splat>) -> Result<Self, LayoutError> {
        let mut builder = PointCloudBuilder::default();
        builder.extend(splats);
        builder.finish()
    }

    pub fn id(&self) -> PointCloudId {
        self.id
    }

    pub fn count(&self) -> usize {
        self.positions.len()
    }

    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    pub fn colors(&self) -> &[Vec4] {
        &self.colors
    }

    pub fn scales(&self) -> &[Vec3] {
        &self.scales
    }

    pub fn rotations(&self) -> &[Quat] {
        &self.rotations
    }

    pub fn opacities(&self) -> &[f32] {
        &self.opacities
    }

    /// Object-space 3D covariance `R S Sᵀ Rᵀ` of point `index`.
    pub fn covariance(&self, index: usize) -> Mat3 {
        let m = Mat3::from_quat(self.rotations[index]) * Mat3::from_diagonal(self.scales[index]);
        m * m.transpose()
    }

    /// Axis aligned bounds of the point centers.
    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        let first = *self.positions.first()?;
        Some(
            self.positions
                .iter()
                .fold((first, first), |(min, max), &p| (min.min(p), max.max(p))),
        )
    }
}

/// Accumulates decoded splats chunk by chunk.
#[derive(Debug, Default)]
pub struct PointCloudBuilder {
    positions: Vec<Vec3>,
    colors: Vec<Vec4>,
    scales: Vec<Vec3>,
    rotations: Vec<Quat>,
    opacities: Vec<f32>,
}

impl PointCloudBuilder {
    pub fn with_capacity(count: usize) -> Self {
        Self {
            positions: Vec::with_capacity(count),
            colors: Vec::with_capacity(count),
            scales: Vec::with_capacity(count),
            rotations: Vec::with_capacity(count),
            opacities: Vec::with_capacity(count),
        }
    }

    pub fn push(&mut self, splat: Splat) {
        self.positions.push(splat.position);
        self.colors.push(splat.color);
        self.scales.push(splat.scale);
        self.rotations.push(splat.rotation);
        self.opacities.push(splat.opacity);
    }

    pub fn extend(&mut self, splats: impl IntoIterator<Item = Splat>) {
        for splat in splats {
            self.push(splat);
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn finish(self) -> Result<PointCloud, LayoutError> {
        PointCloud::from_parts(
            self.positions,
            self.colors,
            self.scales,
            self.rotations,
            self.opacities,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn splat(x: f32) -> Splat {
        Splat {
            position: Vec3::new(x, 0.0, 0.0),
            color: Vec4::new(1.0, 0.5, 0.0, 1.0),
            scale: Vec3::splat(0.1),
            rotation: Quat::from_xyzw(0.0, 0.0, 0.0, 2.0),
            opacity: 0.5,
        }
    }

    #[test]
    fn builds_parallel_arrays() {
        let cloud = PointCloud::from_splats((0..10).map(|i| splat(i as f32))).unwrap();
        assert_eq!(cloud.count(), 10);
        assert_eq!(cloud.colors().len(), 10);
        assert_eq!(cloud.opacities().len(), 10);
        assert!((cloud.rotations()[3].length() - 1.0).abs() < 1e-6);
        let (min, max) = cloud.bounds().unwrap();
        assert_eq!(min.x, 0.0);
        assert_eq!(max.x, 9.0);
    }

    #[test]
    fn ids_are_unique() {
        let a = PointCloud::from_splats([splat(0.0)]).unwrap();
        let b = PointCloud::from_splats([splat(0.0)]).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn rejects_mismatched_lengths() {
        let err = PointCloud::from_parts(
            vec![Vec3::ZERO; 2],
            vec![Vec4::ONE; 2],
            vec![Vec3::ONE; 2],
            vec![Quat::IDENTITY; 2],
            vec![1.0],
        )
        .unwrap_err();
        assert!(matches!(err, LayoutError::LengthMismatch { attribute: "opacity", .. }));
    }

    #[test]
    fn rejects_invalid_values() {
        let mut bad = splat(0.0);
        bad.opacity = 1.5;
        assert!(matches!(
            PointCloud::from_splats([bad]),
            Err(LayoutError::OpacityOutOfRange { index: 0, .. })
        ));

        let mut bad = splat(0.0);
        bad.scale = Vec3::new(0.1, 0.0, 0.1);
        assert!(matches!(
            PointCloud::from_splats([splat(1.0), bad]),
            Err(LayoutError::NonPositiveScale { index: 1 })
        ));

        let mut bad = splat(0.0);
        bad.rotation = Quat::from_xyzw(0.0, 0.0, 0.0, 0.0);
        assert!(matches!(
            PointCloud::from_splats([bad]),
            Err(LayoutError::DegenerateRotation { index: 0 })
        ));
    }

    #[test]
    fn covariance_of_axis_aligned_splat() {
        let mut s = splat(0.0);
        s.scale = Vec3::new(1.0, 2.0, 3.0);
        s.rotation = Quat::IDENTITY;
        let cloud = PointCloud::from_splats([s]).unwrap();
        let cov = cloud.covariance(0);
        assert!((cov.x_axis.x - 1.0).abs() < 1e-6);
        assert!((cov.y_axis.y - 4.0).abs() < 1e-6);
        assert!((cov.z_axis.z - 9.0).abs() < 1e-6);
        assert!(cov.x_axis.y.abs() < 1e-6);
    }
}
