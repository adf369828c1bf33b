use std::path::Path;
use std::rc::Rc;

use anyhow::Context;
use egui::{pos2, Color32, Rect, TextureHandle, TextureOptions};
use splat_render::{channel_surface, SurfaceHost};
use splat_viewer::{
    AssetLoader, FileSource, LoadStatus, PointerButton, PointerEvent, ViewerConfig,
    ViewerController,
};
use tracing::info_span;
use web_time::Instant;

const CONFIG_PATH: &str = "viewer.json";
const ASSET_ROOT: &str = "public";
const DEFAULT_ASSET: &str = "/maltese.splat";

fn load_config(path: &Path) -> anyhow::Result<ViewerConfig> {
    if !path.exists() {
        return Ok(ViewerConfig::default());
    }
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    ViewerConfig::from_json(&json).with_context(|| format!("Invalid config in {}", path.display()))
}

fn to_button(button: egui::PointerButton) -> Option<PointerButton> {
    match button {
        egui::PointerButton::Primary => Some(PointerButton::Primary),
        egui::PointerButton::Secondary => Some(PointerButton::Secondary),
        egui::PointerButton::Middle => Some(PointerButton::Middle),
        _ => None,
    }
}

struct ViewerApp {
    viewer: ViewerController,
    host: Option<SurfaceHost>,
    asset_url: String,
    surface_size: glam::UVec2,
    drag_button: Option<PointerButton>,
    backbuffer: Option<TextureHandle>,
}

impl ViewerApp {
    fn new(config: ViewerConfig, asset_url: String) -> Self {
        let loader = AssetLoader::new(Rc::new(FileSource::new(ASSET_ROOT)));
        Self {
            viewer: ViewerController::new(config, loader),
            host: None,
            asset_url,
            surface_size: glam::UVec2::ZERO,
            drag_button: None,
            backbuffer: None,
        }
    }

    fn handle_input(&mut self, ui: &egui::Ui, rect: Rect, response: &egui::Response) {
        let local = |p: egui::Pos2| {
            let p = p - rect.min;
            glam::vec2(p.x, p.y)
        };

        if response.drag_started() {
            let button = [
                egui::PointerButton::Primary,
                egui::PointerButton::Secondary,
                egui::PointerButton::Middle,
            ]
            .into_iter()
            .find(|b| response.dragged_by(*b))
            .and_then(to_button);

            let origin = ui.input(|i| i.pointer.press_origin());
            if let (Some(button), Some(origin)) = (button, origin) {
                let origin = local(origin);
                self.viewer
                    .on_pointer_down(PointerEvent::new(origin.x, origin.y, button));
                self.drag_button = Some(button);
            }
        }

        if let (Some(button), Some(pos)) = (self.drag_button, response.interact_pointer_pos()) {
            let pos = local(pos);
            let event = PointerEvent::new(pos.x, pos.y, button);
            if response.dragged() {
                self.viewer.on_pointer_move(event);
            }
            if response.drag_stopped() {
                self.viewer.on_pointer_up(event);
                self.drag_button = None;
            }
        }

        if self.drag_button.is_some() && !ui.input(|i| i.pointer.any_down()) {
            self.viewer.on_pointer_leave();
            self.drag_button = None;
        }

        if response.hovered() {
            // egui scrolls up with positive deltas, wheel zoom expects the DOM sign.
            let scrolled = ui.input(|i| i.smooth_scroll_delta.y);
            if scrolled != 0.0 {
                self.viewer.on_wheel(-scrolled * 2.0);
            }
        }
    }

    fn upload_frame(&mut self, ctx: &egui::Context) {
        let Some(frame) = self.host.as_ref().and_then(|h| h.latest_frame()) else {
            return;
        };
        let size = [frame.width() as usize, frame.height() as usize];
        let image = egui::ColorImage::from_rgba_unmultiplied(size, frame.as_raw());

        match self.backbuffer.as_mut() {
            Some(texture) => texture.set(image, TextureOptions::LINEAR),
            None => {
                self.backbuffer = Some(ctx.load_texture("splat frame", image, TextureOptions::LINEAR));
            }
        }
    }
}

impl eframe::App for ViewerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let _span = info_span!("Draw UI").entered();

        egui::CentralPanel::default()
            .frame(egui::Frame::none())
            .show(ctx, |ui| {
                let available = ui.available_size();
                let size = glam::uvec2(available.x.max(1.0) as u32, available.y.max(1.0) as u32);

                let (rect, response) = ui.allocate_exact_size(
                    egui::Vec2::new(size.x as f32, size.y as f32),
                    egui::Sense::drag(),
                );

                if self.host.is_none() {
                    let (surface, host) = channel_surface(size);
                    self.viewer.mount(Box::new(surface), &self.asset_url);
                    self.host = Some(host);
                    self.surface_size = size;
                } else if size != self.surface_size {
                    if let Some(host) = self.host.as_ref() {
                        host.resize(size);
                    }
                    self.viewer.set_viewport(size.as_vec2());
                    self.surface_size = size;
                }

                self.handle_input(ui, rect, &response);
                self.viewer.tick(Instant::now());
                self.upload_frame(ctx);

                ui.painter().rect_filled(rect, 0.0, Color32::from_gray(0x1a));
                if let Some(texture) = self.backbuffer.as_ref() {
                    ui.painter().image(
                        texture.id(),
                        rect,
                        Rect {
                            min: pos2(0.0, 0.0),
                            max: pos2(1.0, 1.0),
                        },
                        Color32::WHITE,
                    );
                }

                match self.viewer.status() {
                    LoadStatus::Loading => {
                        ui.put(rect, egui::Spinner::new());
                    }
                    LoadStatus::Failed(reason) => {
                        ui.put(rect, egui::Label::new(format!("Viewer unavailable: {reason}")));
                    }
                    LoadStatus::Idle | LoadStatus::Ready => (),
                }
            });

        if self.viewer.needs_redraw() {
            ctx.request_repaint();
        }

        if ctx.input(|r| r.key_pressed(egui::Key::Escape)) {
            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
        }
    }

    fn clear_color(&self, _visuals: &egui::Visuals) -> [f32; 4] {
        [0.1, 0.1, 0.1, 1.0]
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = load_config(Path::new(CONFIG_PATH))?;
    let asset_url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_ASSET.to_owned());

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size(egui::Vec2::new(1280.0, 720.0))
            .with_active(true),
        ..Default::default()
    };

    eframe::run_native(
        "Splat viewer",
        native_options,
        Box::new(move |_cc| Ok(Box::new(ViewerApp::new(config, asset_url)))),
    )
    .map_err(|e| anyhow::anyhow!("Viewer window failed: {e}"))?;

    Ok(())
}
