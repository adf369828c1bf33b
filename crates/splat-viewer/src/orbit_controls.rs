use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};
use splat_render::CameraState;
use tracing::{trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrbitConfig {
    /// Radians of azimuth/polar per pixel of drag.
    pub rotate_sensitivity: f32,
    /// Fraction of the orbit radius panned per pixel of drag.
    pub pan_sensitivity: f32,
    /// Zoom rate per unit of wheel delta. The radius scales by `exp(delta * zoom_sensitivity)`.
    pub zoom_sensitivity: f32,
    /// Fraction of the remaining motion removed per nominal 60 Hz frame. 1 disables damping.
    pub damping_factor: f32,
    pub min_radius: f32,
    pub max_radius: f32,
    /// Keeps the polar angle this far from either pole.
    pub polar_epsilon: f32,
    /// Below this residual the camera snaps to its goal and stops moving.
    pub settle_epsilon: f32,
}

impl Default for OrbitConfig {
    fn default() -> Self {
        Self {
            rotate_sensitivity: 0.005,
            pan_sensitivity: 0.002,
            zoom_sensitivity: 0.001,
            damping_factor: 0.1,
            min_radius: 0.25,
            max_radius: 35.0,
            polar_epsilon: 1e-3,
            settle_epsilon: 1e-4,
        }
    }
}

impl OrbitConfig {
    pub fn with_rotate_sensitivity(mut self, rotate_sensitivity: f32) -> Self {
        self.rotate_sensitivity = rotate_sensitivity;
        self
    }

    pub fn with_pan_sensitivity(mut self, pan_sensitivity: f32) -> Self {
        self.pan_sensitivity = pan_sensitivity;
        self
    }

    pub fn with_zoom_sensitivity(mut self, zoom_sensitivity: f32) -> Self {
        self.zoom_sensitivity = zoom_sensitivity;
        self
    }

    pub fn with_damping_factor(mut self, damping_factor: f32) -> Self {
        self.damping_factor = damping_factor;
        self
    }

    pub fn with_radius_limits(mut self, min_radius: f32, max_radius: f32) -> Self {
        self.min_radius = min_radius;
        self.max_radius = max_radius;
        self
    }

    pub fn with_settle_epsilon(mut self, settle_epsilon: f32) -> Self {
        self.settle_epsilon = settle_epsilon;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerButton {
    Primary,
    Secondary,
    Middle,
}

/// Pointer position in surface pixels, origin top left, y down.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub position: Vec2,
    pub button: PointerButton,
}

impl PointerEvent {
    pub fn new(x: f32, y: f32, button: PointerButton) -> Self {
        Self {
            position: Vec2::new(x, y),
            button,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DragMode {
    Rotate,
    Pan,
}

/// Weakest damping accepted, still settling within seconds.
const MIN_DAMPING: f32 = 0.01;

/// Drags are anchored to where they started, so returning the pointer to its
/// start point restores the goal exactly.
#[derive(Debug, Clone, Copy)]
struct Drag {
    mode: DragMode,
    origin: Vec2,
    start_goal: CameraState,
}

/// Damped orbit camera driven by pointer and wheel input.
///
/// Input only moves the goal camera. [`OrbitController::step`] eases the current
/// camera toward it with frame-rate independent exponential decay.
#[derive(Debug, Clone)]
pub struct OrbitController {
    config: OrbitConfig,
    current: CameraState,
    goal: CameraState,
    drag: Option<Drag>,
    viewport: Option<Vec2>,
    settled: bool,
}

impl OrbitController {
    pub fn new(mut config: OrbitConfig, camera: CameraState) -> Self {
        // A factor of zero would never move the camera toward its goal.
        if !(config.damping_factor > 0.0 && config.damping_factor <= 1.0) {
            let clamped = if config.damping_factor > 1.0 { 1.0 } else { MIN_DAMPING };
            warn!(
                damping_factor = config.damping_factor,
                clamped, "Damping factor must be in (0, 1]"
            );
            config.damping_factor = clamped;
        }

        let mut controller = Self {
            config,
            current: camera,
            goal: camera,
            drag: None,
            viewport: None,
            settled: true,
        };
        controller.current = controller.constrained(camera);
        controller.goal = controller.current;
        controller
    }

    pub fn config(&self) -> &OrbitConfig {
        &self.config
    }

    pub fn camera(&self) -> CameraState {
        self.current
    }

    pub fn goal(&self) -> CameraState {
        self.goal
    }

    /// Size of the surface in pixels. Pointer-downs outside it are ignored.
    pub fn set_viewport(&mut self, size: Vec2) {
        self.viewport = Some(size);
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    fn constrained(&self, mut camera: CameraState) -> CameraState {
        let eps = self.config.polar_epsilon;
        camera.polar = camera.polar.clamp(eps, std::f32::consts::PI - eps);
        camera.radius = camera
            .radius
            .clamp(self.config.min_radius, self.config.max_radius);
        camera
    }

    fn set_goal(&mut self, goal: CameraState) {
        let goal = self.constrained(goal);
        if goal != self.goal {
            self.goal = goal;
            self.settled = false;
        }
    }

    fn inside_viewport(&self, position: Vec2) -> bool {
        match self.viewport {
            Some(size) => {
                position.x >= 0.0 && position.y >= 0.0 && position.x < size.x && position.y < size.y
            }
            None => true,
        }
    }

    pub fn on_pointer_down(&mut self, event: PointerEvent) {
        if !self.inside_viewport(event.position) {
            return;
        }

        let mode = match event.button {
            PointerButton::Primary => DragMode::Rotate,
            PointerButton::Secondary | PointerButton::Middle => DragMode::Pan,
        };
        self.drag = Some(Drag {
            mode,
            origin: event.position,
            start_goal: self.goal,
        });
    }

    pub fn on_pointer_move(&mut self, event: PointerEvent) {
        let Some(drag) = self.drag else {
            return;
        };

        let delta = event.position - drag.origin;
        if !delta.is_finite() {
            return;
        }

        let mut goal = self.goal;
        match drag.mode {
            DragMode::Rotate => {
                // Dragging right swings the camera left around the target.
                goal.azimuth = drag.start_goal.azimuth - delta.x * self.config.rotate_sensitivity;
                goal.polar = drag.start_goal.polar - delta.y * self.config.rotate_sensitivity;
            }
            DragMode::Pan => {
                let forward = -drag.start_goal.orbit_direction();
                let right = forward.cross(Vec3::Y).normalize_or_zero();
                let up = right.cross(forward);
                let scale = self.config.pan_sensitivity * drag.start_goal.radius;
                goal.target = drag.start_goal.target - right * (delta.x * scale) + up * (delta.y * scale);
            }
        }
        self.set_goal(goal);
    }

    pub fn on_pointer_up(&mut self, _event: PointerEvent) {
        self.drag = None;
    }

    pub fn on_pointer_leave(&mut self) {
        self.drag = None;
    }

    /// Positive deltas zoom out, matching DOM wheel events.
    pub fn on_wheel(&mut self, delta: f32) {
        if !delta.is_finite() {
            return;
        }
        let mut goal = self.goal;
        goal.radius *= (delta * self.config.zoom_sensitivity).exp();
        self.set_goal(goal);
    }

    /// Largest remaining difference between the current and goal camera.
    pub fn residual(&self) -> f32 {
        let (c, g) = (&self.current, &self.goal);
        (c.azimuth - g.azimuth)
            .abs()
            .max((c.polar - g.polar).abs())
            .max((c.radius - g.radius).abs())
            .max(c.target.distance(g.target))
    }

    pub fn is_settled(&self) -> bool {
        self.settled
    }

    /// Advance the damping by `dt` seconds and return the camera to render.
    pub fn step(&mut self, dt: f32) -> CameraState {
        if self.settled {
            return self.current;
        }

        let k = self.config.damping_factor;
        let remaining = if k >= 1.0 {
            0.0
        } else {
            (1.0 - k).powf(dt.max(0.0) * 60.0)
        };

        let (c, g) = (&mut self.current, &self.goal);
        c.azimuth = g.azimuth + (c.azimuth - g.azimuth) * remaining;
        c.polar = g.polar + (c.polar - g.polar) * remaining;
        c.radius = g.radius + (c.radius - g.radius) * remaining;
        c.target = g.target + (c.target - g.target) * remaining;

        if self.residual() < self.config.settle_epsilon {
            self.current = self.goal;
            self.settled = true;
            trace!("Camera settled");
        }

        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> OrbitController {
        OrbitController::new(OrbitConfig::default(), CameraState::default())
    }

    fn settle(orbit: &mut OrbitController) -> CameraState {
        for _ in 0..10_000 {
            if orbit.is_settled() {
                break;
            }
            orbit.step(1.0 / 60.0);
        }
        assert!(orbit.is_settled());
        orbit.camera()
    }

    #[test]
    fn zero_net_drag_keeps_angles() {
        let mut orbit = controller();
        let before = orbit.camera();

        orbit.on_pointer_down(PointerEvent::new(100.0, 100.0, PointerButton::Primary));
        orbit.on_pointer_move(PointerEvent::new(160.0, 70.0, PointerButton::Primary));
        orbit.step(1.0 / 60.0);
        orbit.on_pointer_move(PointerEvent::new(100.0, 100.0, PointerButton::Primary));
        orbit.on_pointer_up(PointerEvent::new(100.0, 100.0, PointerButton::Primary));

        let after = settle(&mut orbit);
        assert_eq!(after.azimuth, before.azimuth);
        assert_eq!(after.polar, before.polar);
        assert_eq!(after.radius, before.radius);
    }

    #[test]
    fn drag_right_decreases_azimuth() {
        let mut orbit = controller();
        let start = orbit.camera().azimuth;

        orbit.on_pointer_down(PointerEvent::new(100.0, 100.0, PointerButton::Primary));
        orbit.on_pointer_move(PointerEvent::new(150.0, 100.0, PointerButton::Primary));
        orbit.on_pointer_up(PointerEvent::new(150.0, 100.0, PointerButton::Primary));

        let end = settle(&mut orbit).azimuth;
        assert!((end - (start - 50.0 * orbit.config().rotate_sensitivity)).abs() < 1e-6);
    }

    #[test]
    fn damping_converges_monotonically_then_stops() {
        let mut orbit = controller();
        orbit.on_wheel(400.0);
        orbit.on_pointer_down(PointerEvent::new(10.0, 10.0, PointerButton::Primary));
        orbit.on_pointer_move(PointerEvent::new(90.0, 40.0, PointerButton::Primary));
        orbit.on_pointer_leave();

        let mut last = orbit.residual();
        assert!(last > 0.0);
        while !orbit.is_settled() {
            orbit.step(1.0 / 60.0);
            let residual = orbit.residual();
            assert!(residual < last || residual == 0.0);
            last = residual;
        }

        let fixed = orbit.camera();
        for _ in 0..10 {
            assert_eq!(orbit.step(1.0 / 60.0), fixed);
        }
    }

    #[test]
    fn settles_within_about_a_second() {
        let mut orbit = controller();
        orbit.on_pointer_down(PointerEvent::new(0.0, 0.0, PointerButton::Primary));
        orbit.on_pointer_move(PointerEvent::new(40.0, 0.0, PointerButton::Primary));
        orbit.on_pointer_up(PointerEvent::new(40.0, 0.0, PointerButton::Primary));

        let mut frames = 0;
        while !orbit.is_settled() {
            orbit.step(1.0 / 60.0);
            frames += 1;
        }
        assert!(frames <= 90, "took {frames} frames");
    }

    #[test]
    fn undamped_snaps_immediately() {
        let config = OrbitConfig::default().with_damping_factor(1.0);
        let mut orbit = OrbitController::new(config, CameraState::default());
        orbit.on_wheel(100.0);
        let cam = orbit.step(0.016);
        assert!(orbit.is_settled());
        assert_eq!(cam, orbit.goal());
    }

    #[test]
    fn invalid_damping_still_settles() {
        for factor in [0.0, -0.5, f32::NAN] {
            let config = OrbitConfig::default().with_damping_factor(factor);
            let mut orbit = OrbitController::new(config, CameraState::default());
            assert_eq!(orbit.config().damping_factor, MIN_DAMPING);

            orbit.on_wheel(100.0);
            let goal = orbit.goal();
            assert_eq!(settle(&mut orbit), goal);
        }

        let config = OrbitConfig::default().with_damping_factor(3.0);
        let orbit = OrbitController::new(config, CameraState::default());
        assert_eq!(orbit.config().damping_factor, 1.0);
    }

    #[test]
    fn radius_stays_clamped() {
        let mut orbit = controller();
        for delta in [1e9, -1e9, f32::MAX, f32::MIN, f32::INFINITY, f32::NAN, 250.0, -3000.0] {
            for _ in 0..5 {
                orbit.on_wheel(delta);
                let cam = orbit.step(0.5);
                let cfg = orbit.config();
                assert!(cam.radius >= cfg.min_radius && cam.radius <= cfg.max_radius);
                assert!(orbit.goal().radius >= cfg.min_radius && orbit.goal().radius <= cfg.max_radius);
            }
        }
    }

    #[test]
    fn polar_never_reaches_poles() {
        let mut orbit = controller();
        orbit.on_pointer_down(PointerEvent::new(0.0, 0.0, PointerButton::Primary));
        orbit.on_pointer_move(PointerEvent::new(0.0, 100_000.0, PointerButton::Primary));
        let cam = settle(&mut orbit);
        assert!(cam.polar > 0.0);

        orbit.on_pointer_down(PointerEvent::new(0.0, 0.0, PointerButton::Primary));
        orbit.on_pointer_move(PointerEvent::new(0.0, -100_000.0, PointerButton::Primary));
        let cam = settle(&mut orbit);
        assert!(cam.polar < std::f32::consts::PI);
    }

    #[test]
    fn pointer_down_outside_viewport_is_ignored() {
        let mut orbit = controller();
        orbit.set_viewport(Vec2::new(200.0, 100.0));
        orbit.on_pointer_down(PointerEvent::new(250.0, 50.0, PointerButton::Primary));
        assert!(!orbit.is_dragging());
        orbit.on_pointer_down(PointerEvent::new(150.0, 50.0, PointerButton::Primary));
        assert!(orbit.is_dragging());
    }

    #[test]
    fn move_without_drag_does_nothing() {
        let mut orbit = controller();
        orbit.on_pointer_move(PointerEvent::new(500.0, 500.0, PointerButton::Primary));
        assert!(orbit.is_settled());
        assert_eq!(orbit.goal(), orbit.camera());
    }

    #[test]
    fn pan_moves_target_in_view_plane() {
        let mut orbit = controller();
        orbit.on_pointer_down(PointerEvent::new(50.0, 50.0, PointerButton::Secondary));
        orbit.on_pointer_move(PointerEvent::new(100.0, 50.0, PointerButton::Secondary));
        orbit.on_pointer_up(PointerEvent::new(100.0, 50.0, PointerButton::Secondary));

        let cam = settle(&mut orbit);
        // Looking down -Z from +Z, screen right is +X.
        assert!(cam.target.x < 0.0);
        assert!(cam.target.y.abs() < 1e-6 && cam.target.z.abs() < 1e-6);
        assert_eq!(cam.azimuth, CameraState::default().azimuth);
    }
}
