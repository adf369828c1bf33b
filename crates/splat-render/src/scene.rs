use glam::{Mat3, Mat4, Quat, Vec3};
use tracing::debug;

use crate::environment::Environment;
use crate::point_cloud::PointCloud;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }

    /// Rotation and scale part, used to carry covariances into world space.
    pub fn linear(&self) -> Mat3 {
        Mat3::from_quat(self.rotation) * Mat3::from_diagonal(self.scale)
    }
}

#[derive(Debug)]
pub enum EntityKind {
    PointCloud(PointCloud),
    Environment(Environment),
}

#[derive(Debug)]
pub struct SceneEntity {
    pub kind: EntityKind,
    pub transform: Transform,
}

impl SceneEntity {
    pub fn point_cloud(cloud: PointCloud, transform: Transform) -> Self {
        Self {
            kind: EntityKind::PointCloud(cloud),
            transform,
        }
    }

    pub fn environment(environment: Environment) -> Self {
        Self {
            kind: EntityKind::Environment(environment),
            transform: Transform::default(),
        }
    }

    pub fn is_point_cloud(&self) -> bool {
        matches!(self.kind, EntityKind::PointCloud(_))
    }

    pub fn is_environment(&self) -> bool {
        matches!(self.kind, EntityKind::Environment(_))
    }

    pub fn as_point_cloud(&self) -> Option<&PointCloud> {
        match &self.kind {
            EntityKind::PointCloud(cloud) => Some(cloud),
            EntityKind::Environment(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityId(u64);

/// Renderable entities of one viewer.
///
/// Holds at most one point cloud and at most one environment: attaching another
/// of the same kind replaces (and drops) the previous one.
#[derive(Debug, Default)]
pub struct SceneGraph {
    entries: Vec<(EntityId, SceneEntity)>,
    next_id: u64,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, entity: SceneEntity) -> EntityId {
        let singleton = |e: &SceneEntity| {
            (entity.is_point_cloud() && e.is_point_cloud())
                || (entity.is_environment() && e.is_environment())
        };

        if let Some(pos) = self.entries.iter().position(|(_, e)| singleton(e)) {
            let (old_id, _) = self.entries.remove(pos);
            debug!(?old_id, "Replacing scene entity");
        }

        let id = EntityId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, entity));
        id
    }

    pub fn detach(&mut self, id: EntityId) -> Option<SceneEntity> {
        let pos = self.entries.iter().position(|(e_id, _)| *e_id == id)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn entities(&self) -> impl ExactSizeIterator<Item = &SceneEntity> {
        self.entries.iter().map(|(_, e)| e)
    }

    pub fn ids(&self) -> impl ExactSizeIterator<Item = EntityId> + '_ {
        self.entries.iter().map(|(id, _)| *id)
    }

    pub fn point_cloud(&self) -> Option<(&PointCloud, &Transform)> {
        self.entities().find_map(|e| match &e.kind {
            EntityKind::PointCloud(cloud) => Some((cloud, &e.transform)),
            EntityKind::Environment(_) => None,
        })
    }

    pub fn environment(&self) -> Option<&Environment> {
        self.entities().find_map(|e| match &e.kind {
            EntityKind::Environment(env) => Some(env),
            EntityKind::PointCloud(_) => None,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point_cloud::Splat;
    use glam::Vec4;

    fn cloud(n: usize) -> PointCloud {
        PointCloud::from_splats((0..n).map(|i| Splat {
            position: Vec3::new(i as f32, 0.0, 0.0),
            color: Vec4::ONE,
            scale: Vec3::splat(0.01),
            rotation: Quat::IDENTITY,
            opacity: 1.0,
        }))
        .unwrap()
    }

    #[test]
    fn second_point_cloud_replaces_first() {
        let mut scene = SceneGraph::new();
        scene.attach(SceneEntity::environment(Environment::default()));
        let first = scene.attach(SceneEntity::point_cloud(cloud(3), Transform::default()));
        scene.attach(SceneEntity::point_cloud(cloud(5), Transform::default()));

        assert_eq!(scene.entities().filter(|e| e.is_point_cloud()).count(), 1);
        assert_eq!(scene.point_cloud().unwrap().0.count(), 5);
        assert_eq!(scene.len(), 2);
        assert!(scene.detach(first).is_none());
    }

    #[test]
    fn environment_is_singleton() {
        let mut scene = SceneGraph::new();
        scene.attach(SceneEntity::environment(Environment::default()));
        scene.attach(SceneEntity::environment(Environment {
            background: crate::environment::Background::Skybox,
            ..Default::default()
        }));
        assert_eq!(scene.entities().filter(|e| e.is_environment()).count(), 1);
        assert_eq!(
            scene.environment().unwrap().background,
            crate::environment::Background::Skybox
        );
    }

    #[test]
    fn detach_and_clear() {
        let mut scene = SceneGraph::new();
        let id = scene.attach(SceneEntity::point_cloud(cloud(2), Transform::default()));
        let detached = scene.detach(id).unwrap();
        assert_eq!(detached.as_point_cloud().unwrap().count(), 2);
        assert!(scene.point_cloud().is_none());

        scene.attach(SceneEntity::environment(Environment::default()));
        scene.clear();
        assert!(scene.is_empty());
    }

    #[test]
    fn transform_matrix_applies_scale_then_translation() {
        let t = Transform {
            translation: Vec3::new(0.0, 0.3, 0.0),
            scale: Vec3::splat(20.0),
            ..Default::default()
        };
        let p = t.matrix().transform_point3(Vec3::new(0.1, 0.0, 0.0));
        assert!((p - Vec3::new(2.0, 0.3, 0.0)).length() < 1e-5);
        assert!((t.linear() * Vec3::X - Vec3::new(20.0, 0.0, 0.0)).length() < 1e-5);
    }
}
