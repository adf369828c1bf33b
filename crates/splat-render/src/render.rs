use std::ops::Range;

use async_channel::Receiver;
use glam::{Mat3, Mat4, UVec2, Vec2, Vec3};
use image::RgbaImage;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use splat_sort::radix_argsort;
use tracing::{debug, info, info_span, warn};

use crate::camera::CameraState;
use crate::environment::Environment;
use crate::point_cloud::{PointCloud, PointCloudId};
use crate::scene::{SceneGraph, Transform};
use crate::surface::RenderSurface;
use crate::RenderError;

/// Side length in pixels of the screen tiles splats are binned into.
pub const TILE_SIZE: u32 = 16;

/// A pixel stops taking splats once less light than this gets through.
const MIN_TRANSMITTANCE: f32 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Fragments fainter than this are skipped.
    pub alpha_cutoff: f32,
    /// Added to the diagonal of every projected covariance, in pixels².
    pub low_pass: f32,
    /// Width of the quantized depth keys used for back-to-front ordering.
    pub depth_bits: u32,
    /// Upper bound on a splat's footprint radius in pixels.
    pub max_radius_px: f32,
    /// Size of the render worker pool. 0 uses one worker per core.
    pub threads: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            alpha_cutoff: 1.0 / 255.0,
            low_pass: 0.3,
            depth_bits: 16,
            max_radius_px: 512.0,
            threads: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub visible: usize,
    /// False when last frame's depth order was reused.
    pub resorted: bool,
}

/// World space copy of the attached point cloud, prepared once per upload.
struct SplatBuffer {
    cloud: PointCloudId,
    transform: Transform,
    means: Vec<Vec3>,
    covs: Vec<Mat3>,
    colors: Vec<Vec3>,
    opacities: Vec<f32>,
}

impl SplatBuffer {
    fn upload(cloud: &PointCloud, transform: &Transform) -> Self {
        let _span = info_span!("Upload splats", count = cloud.count()).entered();

        let model = transform.matrix();
        let linear = transform.linear();

        Self {
            cloud: cloud.id(),
            transform: *transform,
            means: cloud
                .positions()
                .par_iter()
                .map(|&p| model.transform_point3(p))
                .collect(),
            covs: (0..cloud.count())
                .into_par_iter()
                .map(|i| linear * cloud.covariance(i) * linear.transpose())
                .collect(),
            colors: cloud.colors().iter().map(|c| c.truncate()).collect(),
            opacities: cloud.opacities().to_vec(),
        }
    }

    fn matches(&self, cloud: &PointCloud, transform: &Transform) -> bool {
        self.cloud == cloud.id() && self.transform == *transform
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ProjectedSplat {
    center: Vec2,
    /// Inverse 2D covariance packed as (xx, xy, yy).
    conic: Vec3,
    color: Vec3,
    opacity: f32,
    depth: f32,
    radius: f32,
}

/// Splat lists per screen tile, indexing into the back-to-front ordered splats.
struct TileBins {
    tiles: UVec2,
    ranges: Vec<Range<usize>>,
    splats: Vec<u32>,
}

impl TileBins {
    /// Splats touching tile `(x, y)`, far to near.
    fn tile(&self, x: u32, y: u32) -> &[u32] {
        let range = self.ranges[(y * self.tiles.x + x) as usize].clone();
        &self.splats[range]
    }
}

#[derive(Clone, Copy, PartialEq)]
struct ViewKey {
    view: Mat4,
    size: UVec2,
    fov: f32,
    near: f32,
    far: f32,
}

impl ViewKey {
    fn new(camera: &CameraState, size: UVec2) -> Self {
        Self {
            view: camera.view_matrix(),
            size,
            fov: camera.fov,
            near: camera.near,
            far: camera.far,
        }
    }
}

/// Projected splats of the last frame in back-to-front order, with their tile bins.
struct OrderCache {
    key: ViewKey,
    splats: Vec<ProjectedSplat>,
    bins: TileBins,
}

struct Bound {
    surface: Box<dyn RenderSurface>,
    size: UVec2,
    resize_rx: Option<Receiver<UVec2>>,
    pool: ThreadPool,
}

/// Software splat renderer bound to one [`RenderSurface`].
///
/// Each frame paints the environment, projects every splat to a screen space
/// gaussian, orders them far to near with a radix sort on quantized depth, bins
/// them into screen tiles and composites every tile in parallel. All of that
/// runs on the renderer's own worker pool, the calling thread only waits for
/// the finished image.
pub struct Renderer {
    config: RenderConfig,
    bound: Option<Bound>,
    splats: Option<SplatBuffer>,
    order: Option<OrderCache>,
    frames_rendered: u64,
}

fn not_initialized() -> RenderError {
    RenderError::SurfaceUnavailable("renderer is not initialized".to_owned())
}

impl Renderer {
    pub fn new(config: RenderConfig) -> Self {
        Self {
            config,
            bound: None,
            splats: None,
            order: None,
            frames_rendered: 0,
        }
    }

    pub fn initialize(&mut self, mut surface: Box<dyn RenderSurface>) -> Result<(), RenderError> {
        if self.bound.is_some() {
            self.dispose();
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(self.config.threads)
            .thread_name(|i| format!("splat-render-{i}"))
            .build()
            .map_err(|e| RenderError::Workers(e.to_string()))?;

        let size = surface.acquire()?;
        let resize_rx = surface.subscribe_resize();
        info!(
            width = size.x,
            height = size.y,
            workers = pool.current_num_threads(),
            "Renderer bound to surface"
        );

        self.bound = Some(Bound {
            surface,
            size,
            resize_rx,
            pool,
        });
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.bound.is_some()
    }

    pub fn size(&self) -> Option<UVec2> {
        self.bound.as_ref().map(|b| b.size)
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Apply the newest pending container size, if any.
    fn poll_resize(&mut self) {
        let Some(bound) = self.bound.as_mut() else {
            return;
        };
        let Some(rx) = bound.resize_rx.as_ref() else {
            return;
        };

        let mut latest = None;
        while let Ok(size) = rx.try_recv() {
            latest = Some(size);
        }

        if let Some(size) = latest {
            if size.x > 0 && size.y > 0 && size != bound.size {
                debug!(width = size.x, height = size.y, "Surface resized");
                bound.size = size;
                self.order = None;
            }
        }
    }

    pub fn render_frame(
        &mut self,
        scene: &SceneGraph,
        camera: &CameraState,
    ) -> Result<FrameStats, RenderError> {
        self.poll_resize();
        let Some(bound) = self.bound.as_mut() else {
            return Err(not_initialized());
        };
        let size = bound.size;
        let span = info_span!("Render frame", width = size.x, height = size.y);

        let config = self.config;
        let (splats, order) = (&mut self.splats, &mut self.order);

        let (image, stats) = bound.pool.install(|| {
            span.in_scope(|| {
                let mut frame = draw_environment(scene.environment(), camera, size);

                let stats = match scene.point_cloud() {
                    Some((cloud, transform)) => {
                        let buffer = match splats.take() {
                            Some(buffer) if buffer.matches(cloud, transform) => splats.insert(buffer),
                            _ => {
                                *order = None;
                                splats.insert(SplatBuffer::upload(cloud, transform))
                            }
                        };
                        draw_splats(buffer, order, camera, size, &config, &mut frame)
                    }
                    None => {
                        *splats = None;
                        *order = None;
                        FrameStats::default()
                    }
                };

                (to_image(&frame, size), stats)
            })
        });

        present(bound, image);
        self.frames_rendered += 1;
        Ok(stats)
    }

    /// Paint only the environment. Used when no render loop is running.
    pub fn present_background(
        &mut self,
        scene: &SceneGraph,
        camera: &CameraState,
    ) -> Result<(), RenderError> {
        self.poll_resize();
        let Some(bound) = self.bound.as_mut() else {
            return Err(not_initialized());
        };
        let size = bound.size;

        let image = bound.pool.install(|| {
            let frame = draw_environment(scene.environment(), camera, size);
            to_image(&frame, size)
        });
        present(bound, image);
        Ok(())
    }

    /// Release the surface, the worker pool and all uploaded splat data.
    /// Safe to call repeatedly.
    pub fn dispose(&mut self) {
        self.splats = None;
        self.order = None;

        if let Some(mut bound) = self.bound.take() {
            // Drop the subscription before letting go of the surface.
            bound.resize_rx = None;
            bound.surface.release();
            info!("Renderer disposed");
        }
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn present(bound: &mut Bound, image: Option<RgbaImage>) {
    match image {
        Some(image) => bound.surface.present(image),
        None => warn!("Frame buffer does not match the surface size"),
    }
}

fn to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn to_image(frame: &[Vec3], size: UVec2) -> Option<RgbaImage> {
    let bytes: Vec<u8> = frame
        .par_iter()
        .flat_map_iter(|c| [to_u8(c.x), to_u8(c.y), to_u8(c.z), 255])
        .collect();
    RgbaImage::from_raw(size.x, size.y, bytes)
}

fn draw_environment(environment: Option<&Environment>, camera: &CameraState, size: UVec2) -> Vec<Vec3> {
    let pixels = (size.x * size.y) as usize;

    let Some(environment) = environment else {
        return vec![Vec3::ZERO; pixels];
    };

    if let Some(color) = environment.uniform_color() {
        return vec![color; pixels];
    }

    let _span = info_span!("Draw skybox").entered();

    let camera_to_world = camera.local_to_world();
    let aspect = size.x as f32 / size.y as f32;
    let tan_half = (camera.fov * 0.5).tan();

    let mut frame = vec![Vec3::ZERO; pixels];
    frame
        .par_chunks_mut(size.x as usize)
        .enumerate()
        .for_each(|(y, row)| {
            let ndc_y = 1.0 - 2.0 * (y as f32 + 0.5) / size.y as f32;
            for (x, pixel) in row.iter_mut().enumerate() {
                let ndc_x = 2.0 * (x as f32 + 0.5) / size.x as f32 - 1.0;
                let dir = Vec3::new(ndc_x * tan_half * aspect, ndc_y * tan_half, -1.0);
                let dir = camera_to_world.transform_vector3(dir).normalize();
                *pixel = environment.sample(dir);
            }
        });
    frame
}

fn draw_splats(
    buffer: &SplatBuffer,
    order: &mut Option<OrderCache>,
    camera: &CameraState,
    size: UVec2,
    config: &RenderConfig,
    frame: &mut [Vec3],
) -> FrameStats {
    let key = ViewKey::new(camera, size);
    let resorted = !order.as_ref().is_some_and(|o| o.key == key);

    if resorted {
        let projected = {
            let _span = info_span!("Project splats").entered();
            project_splats(buffer, camera, size, config)
        };
        let splats = {
            let _span = info_span!("Sort splats", visible = projected.len()).entered();
            sort_back_to_front(projected, config.depth_bits)
        };
        let bins = {
            let _span = info_span!("Bin splats").entered();
            bin_tiles(&splats, size)
        };
        *order = Some(OrderCache { key, splats, bins });
    }

    let Some(cache) = order.as_ref() else {
        return FrameStats::default();
    };

    {
        let _span = info_span!("Rasterize splats").entered();
        rasterize(&cache.splats, &cache.bins, size, config.alpha_cutoff, frame);
    }

    FrameStats {
        visible: cache.splats.len(),
        resorted,
    }
}

/// Per-frame constants of the EWA projection.
struct Projector {
    view: Mat4,
    view_rot: Mat3,
    size: Vec2,
    focal: f32,
    /// Jacobian clamp, a slightly enlarged frustum in tangent space.
    limit: Vec2,
    near: f32,
    far: f32,
    low_pass: f32,
    max_radius: f32,
}

impl Projector {
    fn new(camera: &CameraState, size: UVec2, config: &RenderConfig) -> Self {
        let view = camera.view_matrix();
        let size_f = size.as_vec2();
        let tan_half_y = (camera.fov * 0.5).tan();

        Self {
            view,
            view_rot: Mat3::from_mat4(view),
            size: size_f,
            focal: camera.focal(size.y),
            limit: Vec2::new(1.3 * tan_half_y * size_f.x / size_f.y, 1.3 * tan_half_y),
            near: camera.near,
            far: camera.far,
            low_pass: config.low_pass,
            max_radius: config.max_radius_px,
        }
    }

    /// Screen center, conic, depth and radius of a world space splat, `None` when culled.
    fn project(&self, mean: Vec3, cov: &Mat3) -> Option<(Vec2, Vec3, f32, f32)> {
        let t = self.view.transform_point3(mean);
        let depth = -t.z;
        if depth <= self.near || depth >= self.far {
            return None;
        }

        // Splats far off axis otherwise blow up into huge smears.
        let tx = (t.x / depth).clamp(-self.limit.x, self.limit.x) * depth;
        let ty = (t.y / depth).clamp(-self.limit.y, self.limit.y) * depth;
        let focal = self.focal;
        let inv_d = 1.0 / depth;
        let inv_d2 = inv_d * inv_d;

        // Rows: d(u)/d(t) and d(v)/d(t) with v pointing down the image.
        let jacobian = Mat3::from_cols(
            Vec3::new(focal * inv_d, 0.0, 0.0),
            Vec3::new(0.0, -focal * inv_d, 0.0),
            Vec3::new(focal * tx * inv_d2, -focal * ty * inv_d2, 0.0),
        );
        let m = jacobian * self.view_rot;
        let cov = m * *cov * m.transpose();

        let a = cov.x_axis.x + self.low_pass;
        let b = cov.y_axis.x;
        let c = cov.y_axis.y + self.low_pass;
        let det = a * c - b * b;
        if det <= 0.0 || !det.is_finite() {
            return None;
        }

        let mid = 0.5 * (a + c);
        let lambda = mid + (mid * mid - det).max(0.1).sqrt();
        let radius = (3.0 * lambda.sqrt()).ceil().min(self.max_radius);

        let center = Vec2::new(focal * t.x * inv_d, -focal * t.y * inv_d) + self.size * 0.5;
        if center.x + radius < 0.0
            || center.y + radius < 0.0
            || center.x - radius > self.size.x
            || center.y - radius > self.size.y
        {
            return None;
        }

        Some((center, Vec3::new(c / det, -b / det, a / det), depth, radius))
    }
}

/// EWA projection of every splat in front of the camera.
fn project_splats(
    buffer: &SplatBuffer,
    camera: &CameraState,
    size: UVec2,
    config: &RenderConfig,
) -> Vec<ProjectedSplat> {
    let projector = Projector::new(camera, size, config);

    (0..buffer.means.len())
        .into_par_iter()
        .filter_map(|i| {
            let (center, conic, depth, radius) = projector.project(buffer.means[i], &buffer.covs[i])?;
            Some(ProjectedSplat {
                center,
                conic,
                color: buffer.colors[i],
                opacity: buffer.opacities[i],
                depth,
                radius,
            })
        })
        .collect()
}

/// Orders splats far to near. Depths are bucketed into `depth_bits` wide keys
/// spanning the visible depth range, then radix sorted.
fn sort_back_to_front(projected: Vec<ProjectedSplat>, depth_bits: u32) -> Vec<ProjectedSplat> {
    if projected.len() < 2 {
        return projected;
    }

    let depth_bits = depth_bits.clamp(1, 32);
    let max_key = (u64::MAX >> (64 - depth_bits)) as f64;

    let (min_d, max_d) = projected
        .par_iter()
        .map(|s| (s.depth, s.depth))
        .reduce(
            || (f32::MAX, f32::MIN),
            |(lo_a, hi_a), (lo_b, hi_b)| (lo_a.min(lo_b), hi_a.max(hi_b)),
        );
    let range = (max_d - min_d).max(f32::EPSILON) as f64;

    let keys: Vec<u32> = projected
        .par_iter()
        .map(|s| (((s.depth - min_d) as f64 / range) * max_key).round() as u32)
        .collect();
    let indices: Vec<u32> = (0..projected.len() as u32).collect();

    let (_, near_to_far) = radix_argsort(&keys, &indices, depth_bits);
    near_to_far
        .par_iter()
        .rev()
        .map(|&i| projected[i as usize])
        .collect()
}

/// Tiles covered by a splat's footprint, as a half open `[min, max)` rect.
fn tile_rect(splat: &ProjectedSplat, tiles: UVec2) -> (UVec2, UVec2) {
    let tile = TILE_SIZE as f32;
    let min = ((splat.center - splat.radius) / tile).floor().max(Vec2::ZERO);
    let max = ((splat.center + splat.radius) / tile).floor() + 1.0;
    let min = min.as_uvec2().min(tiles);
    let max = max.max(Vec2::ZERO).as_uvec2().min(tiles).max(min);
    (min, max)
}

/// Bins back-to-front ordered splats into screen tiles. Each tile keeps the
/// global order, since the radix sort on tile ids is stable.
fn bin_tiles(splats: &[ProjectedSplat], size: UVec2) -> TileBins {
    let tiles = (size + UVec2::splat(TILE_SIZE - 1)) / TILE_SIZE;
    let num_tiles = (tiles.x * tiles.y) as usize;

    let (tile_ids, splat_ids): (Vec<u32>, Vec<u32>) = splats
        .par_iter()
        .enumerate()
        .flat_map_iter(|(i, splat)| {
            let (min, max) = tile_rect(splat, tiles);
            (min.y..max.y).flat_map(move |y| (min.x..max.x).map(move |x| (y * tiles.x + x, i as u32)))
        })
        .unzip();

    let tile_bits = u32::BITS - (num_tiles.max(2) as u32 - 1).leading_zeros();
    let (tile_ids, splat_ids) = radix_argsort(&tile_ids, &splat_ids, tile_bits);

    let mut ranges = vec![0..0; num_tiles];
    let mut start = 0;
    for end in 1..=tile_ids.len() {
        if end == tile_ids.len() || tile_ids[end] != tile_ids[start] {
            ranges[tile_ids[start] as usize] = start..end;
            start = end;
        }
    }

    TileBins {
        tiles,
        ranges,
        splats: splat_ids,
    }
}

/// Composites a tile's splats over `background`, nearest first, stopping once
/// the pixel is saturated. Same result as blending far to near.
fn shade_pixel(
    splats: &[ProjectedSplat],
    list: &[u32],
    pixel: Vec2,
    alpha_cutoff: f32,
    background: Vec3,
) -> Vec3 {
    let mut color = Vec3::ZERO;
    let mut transmittance = 1.0;

    for &i in list.iter().rev() {
        let splat = &splats[i as usize];
        let d = pixel - splat.center;
        let power = -0.5 * (splat.conic.x * d.x * d.x + splat.conic.z * d.y * d.y)
            - splat.conic.y * d.x * d.y;
        if power > 0.0 {
            continue;
        }

        let alpha = (splat.opacity * power.exp()).min(0.99);
        if alpha < alpha_cutoff {
            continue;
        }

        color += splat.color * (alpha * transmittance);
        transmittance *= 1.0 - alpha;
        if transmittance < MIN_TRANSMITTANCE {
            break;
        }
    }

    color + background * transmittance
}

/// Shade every tile over `frame`. Bands of tile rows are processed in parallel.
fn rasterize(
    splats: &[ProjectedSplat],
    bins: &TileBins,
    size: UVec2,
    alpha_cutoff: f32,
    frame: &mut [Vec3],
) {
    let width = size.x as usize;
    let tile = TILE_SIZE as usize;

    frame
        .par_chunks_mut(tile * width)
        .enumerate()
        .for_each(|(ty, band)| {
            let rows = band.len() / width;

            for tx in 0..bins.tiles.x {
                let list = bins.tile(tx, ty as u32);
                if list.is_empty() {
                    continue;
                }

                let x0 = tx as usize * tile;
                let x1 = (x0 + tile).min(width);
                for row in 0..rows {
                    let py = (ty * tile + row) as f32 + 0.5;
                    for px in x0..x1 {
                        let dst = &mut band[row * width + px];
                        let pixel = Vec2::new(px as f32 + 0.5, py);
                        *dst = shade_pixel(splats, list, pixel, alpha_cutoff, *dst);
                    }
                }
            }
        });
}
