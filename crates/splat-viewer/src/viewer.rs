use futures_lite::future;
use glam::Vec2;
use splat_render::{
    CameraState, FrameStats, PointCloud, RenderError, RenderSurface, Renderer, SceneEntity,
    SceneGraph,
};
use tracing::{debug, info, info_span, warn};
use web_time::Instant;

use crate::asset::{AssetError, AssetLoader, CancelToken};
use crate::config::ViewerConfig;
use crate::frame_loop::FrameLoop;
use crate::orbit_controls::{OrbitController, PointerEvent};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ViewerFailure {
    #[error(transparent)]
    Asset(#[from] AssetError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LoadStatus {
    #[default]
    Idle,
    Loading,
    Ready,
    Failed(ViewerFailure),
}

struct PendingLoad {
    url: String,
    token: CancelToken,
    future: future::BoxedLocal<Result<PointCloud, AssetError>>,
}

/// Composition root of the embedded viewer.
///
/// Everything runs on the caller's thread. The host calls [`ViewerController::tick`]
/// once per display refresh; a pending asset load is polled at the start of each
/// tick, so a decoded cloud is always attached before the frame that draws it.
pub struct ViewerController {
    config: ViewerConfig,
    loader: AssetLoader,
    renderer: Renderer,
    scene: SceneGraph,
    orbit: OrbitController,
    frame_loop: FrameLoop,
    status: LoadStatus,
    pending: Option<PendingLoad>,
    mounted: bool,
    dirty: bool,
}

impl ViewerController {
    pub fn new(config: ViewerConfig, loader: AssetLoader) -> Self {
        let loader = loader.with_limits(config.limits);
        Self {
            renderer: Renderer::new(config.render),
            orbit: OrbitController::new(config.orbit, config.camera.camera()),
            config,
            loader,
            scene: SceneGraph::new(),
            frame_loop: FrameLoop::new(),
            status: LoadStatus::Idle,
            pending: None,
            mounted: false,
            dirty: false,
        }
    }

    /// Bind to `surface` and start loading `url`.
    ///
    /// Failures never escape: they leave the viewer in [`LoadStatus::Failed`] with
    /// only the environment on screen.
    pub fn mount(&mut self, surface: Box<dyn RenderSurface>, url: &str) {
        if self.mounted {
            self.unmount();
        }
        let _span = info_span!("Mount viewer", url).entered();

        self.orbit = OrbitController::new(self.config.orbit, self.config.camera.camera());
        self.scene.clear();
        self.scene
            .attach(SceneEntity::environment(self.config.environment));
        self.status = LoadStatus::Idle;

        if let Err(err) = self.renderer.initialize(surface) {
            warn!("Failed to acquire render surface: {err}");
            self.status = LoadStatus::Failed(err.into());
            return;
        }

        if let Some(size) = self.renderer.size() {
            self.orbit.set_viewport(size.as_vec2());
        }

        self.mounted = true;
        self.dirty = true;
        self.load(url);
    }

    /// Start a new load on a mounted viewer, cancelling one in flight.
    /// The current point cloud stays on screen until the new one is ready.
    pub fn load(&mut self, url: &str) {
        if !self.mounted {
            warn!(url, "Ignoring load on an unmounted viewer");
            return;
        }
        self.cancel_pending();

        let token = CancelToken::new();
        let future = self.loader.load(url, token.clone());
        self.pending = Some(PendingLoad {
            url: url.to_owned(),
            token,
            future,
        });
        self.status = LoadStatus::Loading;
        info!(url, "Loading asset");
    }

    fn cancel_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            debug!(url = %pending.url, "Cancelling pending load");
            pending.token.cancel();
        }
    }

    /// Cancel any load, stop the frame loop, release the renderer and empty the scene.
    pub fn unmount(&mut self) {
        if !self.mounted && self.pending.is_none() && !self.renderer.is_initialized() {
            return;
        }
        let _span = info_span!("Unmount viewer").entered();

        self.cancel_pending();
        self.frame_loop.stop();
        self.renderer.dispose();
        self.scene.clear();
        self.status = LoadStatus::Idle;
        self.mounted = false;
        self.dirty = false;
    }

    fn poll_load(&mut self) {
        let Some(pending) = self.pending.as_mut() else {
            return;
        };
        let Some(result) = future::block_on(future::poll_once(&mut pending.future)) else {
            return;
        };
        let Some(pending) = self.pending.take() else {
            return;
        };
        if pending.token.is_cancelled() {
            return;
        }

        match result {
            Ok(cloud) => {
                info!(url = %pending.url, points = cloud.count(), "Asset ready");
                self.scene.attach(SceneEntity::point_cloud(
                    cloud,
                    self.config.splat.transform(),
                ));
                self.status = LoadStatus::Ready;
                self.dirty = true;
                self.frame_loop.start();
            }
            Err(err) => {
                warn!(url = %pending.url, "Asset failed to load: {err}");
                self.fail(err.into());
            }
        }
    }

    fn fail(&mut self, failure: ViewerFailure) {
        self.status = LoadStatus::Failed(failure);
        self.frame_loop.stop();

        let cloud_id = self
            .scene
            .ids()
            .zip(self.scene.entities())
            .find(|(_, e)| e.is_point_cloud())
            .map(|(id, _)| id);
        if let Some(id) = cloud_id {
            self.scene.detach(id);
        }

        // Leave the neutral backdrop on screen.
        if self.renderer.is_initialized() {
            let camera = self.orbit.camera();
            if let Err(err) = self.renderer.present_background(&self.scene, &camera) {
                warn!("Failed to present background: {err}");
            }
        }
        self.dirty = false;
    }

    /// Drive the viewer for one display refresh.
    pub fn tick(&mut self, now: Instant) -> Option<FrameStats> {
        if !self.mounted {
            return None;
        }

        self.poll_load();

        let dt = self.frame_loop.tick(now)?;
        let camera = self.orbit.step(dt);

        match self.renderer.render_frame(&self.scene, &camera) {
            Ok(stats) => {
                self.dirty = false;
                Some(stats)
            }
            Err(err) => {
                warn!("Render failed: {err}");
                self.fail(err.into());
                None
            }
        }
    }

    pub fn on_pointer_down(&mut self, event: PointerEvent) {
        if self.mounted {
            self.orbit.on_pointer_down(event);
        }
    }

    pub fn on_pointer_move(&mut self, event: PointerEvent) {
        if self.mounted {
            self.orbit.on_pointer_move(event);
        }
    }

    pub fn on_pointer_up(&mut self, event: PointerEvent) {
        self.orbit.on_pointer_up(event);
    }

    pub fn on_pointer_leave(&mut self) {
        self.orbit.on_pointer_leave();
    }

    pub fn on_wheel(&mut self, delta: f32) {
        if self.mounted {
            self.orbit.on_wheel(delta);
        }
    }

    /// Tell the viewer about a new container size so pointer hit tests follow it.
    /// The renderer picks the size up through its own resize subscription.
    pub fn set_viewport(&mut self, size: Vec2) {
        self.orbit.set_viewport(size);
        self.dirty = true;
    }

    pub fn status(&self) -> &LoadStatus {
        &self.status
    }

    pub fn scene(&self) -> &SceneGraph {
        &self.scene
    }

    pub fn camera(&self) -> CameraState {
        self.orbit.camera()
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    pub fn is_running(&self) -> bool {
        self.frame_loop.is_running()
    }

    /// Whether the host should schedule another refresh soon.
    pub fn needs_redraw(&self) -> bool {
        if !self.mounted {
            return false;
        }
        match self.status {
            LoadStatus::Loading => true,
            LoadStatus::Ready => self.dirty || !self.orbit.is_settled() || self.orbit.is_dragging(),
            LoadStatus::Idle | LoadStatus::Failed(_) => false,
        }
    }
}

impl Drop for ViewerController {
    fn drop(&mut self) {
        self.unmount();
    }
}
