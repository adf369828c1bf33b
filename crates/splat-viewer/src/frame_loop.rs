use web_time::Instant;

/// Longest frame step handed to the camera. Longer gaps (a hidden window, a
/// debugger pause) are treated as one slow frame.
const MAX_FRAME_DT: f32 = 0.1;

/// Explicitly started and stopped per-refresh schedule. The host calls
/// [`FrameLoop::tick`] once per display refresh.
#[derive(Debug, Clone, Default)]
pub struct FrameLoop {
    running: bool,
    last_tick: Option<Instant>,
    frames: u64,
}

impl FrameLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) {
        if !self.running {
            self.running = true;
            self.last_tick = None;
        }
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.last_tick = None;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Number of ticks that produced a frame since creation.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Seconds since the previous tick, or `None` while stopped. The first tick
    /// after a start reports zero.
    pub fn tick(&mut self, now: Instant) -> Option<f32> {
        if !self.running {
            return None;
        }

        let dt = self
            .last_tick
            .map(|last| now.saturating_duration_since(last).as_secs_f32())
            .unwrap_or(0.0)
            .min(MAX_FRAME_DT);

        self.last_tick = Some(now);
        self.frames += 1;
        Some(dt)
    }
}
